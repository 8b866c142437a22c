//! The session state machine.
//!
//! A [`Session`] owns a [`Transport`] and drives the RoomInfo → Connect →
//! Connected handshake over it. Transport callbacks run on the network
//! threads: they update the session under its mutex and publish
//! [`SessionEvent`]s, which the application consumes on its own thread.
//!
//! Locking order is session `inner` before the transport's own lock. The
//! transport never calls back into the session while holding its lock, so
//! sending from inside a handler is fine; `Transport::connect` is always
//! called with `inner` released.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;
use ws_client::timer::panic_message;
use ws_client::url::split_host_port;
use ws_client::{
    CancelToken, Message, StatsSnapshot, Transport, TransportConfig, TransportHandler, WsError,
    WsUrl, close_code,
};

use crate::codec;
use crate::config::SessionConfig;
use crate::error::{ErrorKind, PacketError, SessionError};
use crate::event::{Callbacks, EventSink, SessionEvent};
use crate::packet::{
    ClientStatus, ConnectedPacket, NetworkItem, NetworkPlayer, Packet, ReceivedItemsPacket,
    RoomInfo, RoomUpdatePacket,
};
use crate::state::{PendingChecks, ReceivedOutcome, SessionSnapshot};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    /// Transport is up; the server's RoomInfo has not arrived yet.
    WaitingForRoomInfo,
    /// Connect was sent; waiting for Connected or ConnectionRefused.
    Authenticating,
    Authenticated,
    Failed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::WaitingForRoomInfo => "waiting_for_room_info",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Failed => "failed",
        }
    }

    /// A connection attempt is in progress or established.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::WaitingForRoomInfo | Self::Authenticating | Self::Authenticated
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectParams {
    host: String,
    port: u16,
    path: String,
    slot_name: String,
    password: String,
}

impl ConnectParams {
    fn same_target(&self, other: &Self) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.path == other.path
            && self.slot_name == other.slot_name
    }
}

/// Accepts `host`, `host:port`, or `ws://host[:port][/path]`. `port` applies
/// when the address names none.
fn parse_address(address: &str, port: u16) -> Result<WsUrl, WsError> {
    let address = address.trim();
    if address.contains("://") {
        return WsUrl::parse_with_port(address, port);
    }
    let (host, port) = split_host_port(address, port)?;
    Ok(WsUrl {
        host,
        port,
        path: "/".to_string(),
    })
}

#[derive(Default)]
struct Inner {
    state: SessionState,
    params: Option<ConnectParams>,
    snapshot: SessionSnapshot,
    room_info: Option<RoomInfo>,
    outbox: PendingChecks,
    /// Set by `disconnect()`; suppresses reconnection until the next `connect()`.
    user_disconnected: bool,
    /// A reconnect cycle is running: set when the first retry is scheduled,
    /// cleared on Connected, ConnectionRefused, or an explicit connect/disconnect.
    reconnecting: bool,
    reconnect: Option<Arc<CancelToken>>,
    reconnect_thread: Option<JoinHandle<()>>,
}

impl Inner {
    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect.take() {
            timer.cancel();
        }
        self.reconnecting = false;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SessionCore {
    config: SessionConfig,
    session_id: String,
    transport: Transport,
    inner: Mutex<Inner>,
    events: EventSink,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    callbacks: Mutex<Callbacks>,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    this: Weak<SessionCore>,
}

/// Routes transport callbacks to the session without keeping it alive.
struct SessionLink(Weak<SessionCore>);

impl TransportHandler for SessionLink {
    fn on_connected(&self) {
        if let Some(core) = self.0.upgrade() {
            core.handle_transport_connected();
        }
    }

    fn on_disconnected(&self, code: u16, reason: &str) {
        if let Some(core) = self.0.upgrade() {
            core.handle_transport_disconnected(code, reason);
        }
    }

    fn on_message(&self, message: Message) {
        let Some(core) = self.0.upgrade() else {
            return;
        };
        match message {
            Message::Text(text) => core.handle_text(&text),
            Message::Binary(data) => debug!(len = data.len(), "ignoring binary message"),
            Message::Pong(_) => trace!("pong"),
        }
    }

    fn on_error(&self, error: &WsError) {
        if let Some(core) = self.0.upgrade() {
            core.handle_transport_error(error);
        }
    }
}

impl SessionCore {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    fn publish(&self, event: SessionEvent) {
        self.events.publish(event);
    }

    fn publish_error(&self, error: &SessionError) {
        self.publish(SessionEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    /// Encode and queue one packet. Returns false if it was not queued.
    fn send(&self, packet: &Packet) -> bool {
        let text = match codec::encode(packet) {
            Ok(text) => text,
            Err(e) => {
                error!(cmd = packet.cmd(), error = %e, "failed to encode packet");
                return false;
            }
        };
        if self.transport.send_text(text) {
            self.messages_sent.fetch_add(1, Ordering::Relaxed);
            trace!(cmd = packet.cmd(), "sent packet");
            true
        } else {
            debug!(cmd = packet.cmd(), "send dropped: transport not connected");
            false
        }
    }

    fn send_if_authenticated(&self, packet: &Packet) -> bool {
        let inner = self.lock();
        if inner.state != SessionState::Authenticated {
            debug!(cmd = packet.cmd(), state = %inner.state, "not authenticated, dropping");
            return false;
        }
        self.send(packet)
    }

    fn send_connect(&self, inner: &mut Inner) -> bool {
        let Some(params) = inner.params.as_ref() else {
            return false;
        };
        let packet = Packet::Connect {
            password: params.password.clone(),
            game: self.config.game.clone(),
            name: params.slot_name.clone(),
            uuid: self.session_id.clone(),
            version: self.config.version.clone(),
            items_handling: self.config.items_handling,
            tags: self.config.tags.clone(),
            slot_data: true,
        };
        if !self.send(&packet) {
            return false;
        }
        info!(slot = %params.slot_name, game = %self.config.game, "sent Connect");
        inner.state = SessionState::Authenticating;
        true
    }

    // -------------------------------------------------------------------------
    // Transport callbacks
    // -------------------------------------------------------------------------

    fn handle_transport_connected(&self) {
        let mut inner = self.lock();
        if inner.state != SessionState::Connecting {
            debug!(state = %inner.state, "transport connected in unexpected state");
            return;
        }
        inner.state = SessionState::WaitingForRoomInfo;
        debug!("transport connected, waiting for RoomInfo");
    }

    fn handle_transport_disconnected(&self, code: u16, reason: &str) {
        let (prior, reconnect, user_disconnected) = {
            let mut inner = self.lock();
            let prior = inner.state;
            inner.state = SessionState::Disconnected;
            let was_live = matches!(
                prior,
                SessionState::Authenticated | SessionState::Authenticating
            );
            let reconnect = self.config.auto_reconnect
                && !inner.user_disconnected
                && (was_live || inner.reconnecting);
            (prior, reconnect, inner.user_disconnected)
        };

        info!(code, reason, prior = %prior, reconnect, "session disconnected");
        // Scheduled first so checks made in response to the event reach the outbox.
        if reconnect {
            self.schedule_reconnect();
        }
        if !user_disconnected {
            self.publish(SessionEvent::Disconnected {
                code,
                reason: reason.to_string(),
            });
        }
    }

    fn handle_transport_error(&self, error: &WsError) {
        let error = SessionError::from_transport(error);
        let kind = error.kind();
        let retry = {
            let mut inner = self.lock();
            if kind == ErrorKind::ConnectionFailed && inner.state == SessionState::Connecting {
                let retry = self.config.auto_reconnect
                    && inner.reconnecting
                    && !inner.user_disconnected;
                inner.state = if retry {
                    SessionState::Disconnected
                } else {
                    SessionState::Failed
                };
                retry
            } else {
                false
            }
        };

        warn!(
            error = %error,
            code = error.transport_code().unwrap_or_default(),
            kind = %kind,
            "transport error"
        );
        self.publish_error(&error);
        if retry {
            self.schedule_reconnect();
        }
    }

    fn handle_text(&self, text: &str) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        let packets = match codec::decode(text) {
            Ok(packets) => packets,
            Err(e) => return self.report_packet_error(e),
        };
        for packet in packets {
            match packet {
                Ok(packet) => self.dispatch(packet),
                Err(e) => self.report_packet_error(e),
            }
        }
    }

    fn report_packet_error(&self, error: PacketError) {
        warn!(error = %error, code = error.error_code(), "dropping packet");
        self.publish_error(&SessionError::Packet(error));
    }

    fn dispatch(&self, packet: Packet) {
        match packet {
            Packet::RoomInfo(info) => self.handle_room_info(info),
            Packet::Connected(connected) => self.handle_connected(&connected),
            Packet::ConnectionRefused { errors } => self.handle_refused(errors),
            Packet::ReceivedItems(received) => self.handle_received_items(&received),
            Packet::PrintJson(print) => {
                let text = print.plain_text();
                if !text.is_empty() {
                    self.publish(SessionEvent::ChatMessage { text });
                }
            }
            Packet::LocationInfo { locations } => {
                self.lock().snapshot.record_scouts(&locations);
                debug!(count = locations.len(), "received scouted locations");
                self.publish(SessionEvent::LocationsScouted { items: locations });
            }
            Packet::RoomUpdate(update) => self.handle_room_update(&update),
            other => {
                let cmd = other.cmd();
                warn!(cmd, "server sent a client-only command");
                self.publish(SessionEvent::Error {
                    kind: ErrorKind::ProtocolError,
                    message: format!("unexpected command `{cmd}` from server"),
                });
            }
        }
    }

    fn handle_room_info(&self, info: RoomInfo) {
        info!(
            seed = %info.seed_name,
            version = %info.version,
            password = info.password,
            "received RoomInfo"
        );
        let mut inner = self.lock();
        inner.room_info = Some(info);
        if inner.state != SessionState::WaitingForRoomInfo {
            return;
        }
        let has_slot = inner
            .params
            .as_ref()
            .is_some_and(|p| !p.slot_name.is_empty());
        if has_slot {
            self.send_connect(&mut inner);
        } else {
            debug!("no slot name yet, waiting for authenticate()");
        }
    }

    fn handle_connected(&self, packet: &ConnectedPacket) {
        let mut inner = self.lock();
        if inner.state != SessionState::Authenticating {
            warn!(state = %inner.state, "ignoring Connected outside the handshake");
            return;
        }
        inner.snapshot.apply_connected(packet);
        inner.outbox.acknowledge(&packet.checked_locations);
        inner.state = SessionState::Authenticated;
        inner.reconnecting = false;
        inner.snapshot.status = ClientStatus::Ready;
        info!(
            team = packet.team,
            slot = packet.slot,
            players = packet.players.len(),
            checked = packet.checked_locations.len(),
            "authenticated"
        );

        self.send(&Packet::StatusUpdate {
            status: ClientStatus::Ready,
        });
        self.publish(SessionEvent::Connected);
        self.deliver_outbox(&mut inner);
    }

    /// Resend every check the server has not acknowledged yet.
    fn deliver_outbox(&self, inner: &mut Inner) {
        if inner.outbox.is_empty() {
            return;
        }
        let entries = inner.outbox.entries().to_vec();
        for entry in &entries {
            inner.snapshot.apply_check(entry.location);
            if !entry.announced {
                self.publish(SessionEvent::LocationChecked {
                    location: entry.location,
                });
            }
        }
        inner.outbox.mark_all_announced();
        info!(count = entries.len(), "delivering pending location checks");
        self.send(&Packet::LocationChecks {
            locations: entries.iter().map(|e| e.location).collect(),
        });
    }

    fn handle_refused(&self, errors: Vec<String>) {
        {
            let mut inner = self.lock();
            inner.state = SessionState::Failed;
            inner.cancel_reconnect();
        }
        let error = SessionError::ConnectionRefused { errors };
        warn!(error = %error, "server refused the connection");
        self.publish_error(&error);
        self.transport.disconnect(close_code::NORMAL, "");
    }

    fn handle_received_items(&self, packet: &ReceivedItemsPacket) {
        let outcome = self.lock().snapshot.apply_received_items(packet);
        match outcome {
            ReceivedOutcome::Replaced { count } => debug!(count, "received full item list"),
            ReceivedOutcome::Appended(items) => {
                debug!(count = items.len(), index = packet.index, "received items");
                for item in items {
                    self.publish(SessionEvent::ItemReceived { item });
                }
            }
            ReceivedOutcome::OutOfSync { expected, got } => {
                warn!(expected, got, "item index ahead of local count, requesting sync");
                self.send(&Packet::Sync);
            }
            ReceivedOutcome::InvalidIndex { got } => {
                self.report_packet_error(PacketError::OutOfRange {
                    cmd: "ReceivedItems",
                    reason: format!("negative index {got}"),
                });
            }
        }
    }

    fn handle_room_update(&self, update: &RoomUpdatePacket) {
        let mut inner = self.lock();
        let learned = inner.snapshot.apply_room_update(update);
        if let Some(checked) = &update.checked_locations {
            inner.outbox.acknowledge(checked);
        }
        if let Some(info) = inner.room_info.as_mut() {
            if let Some(permissions) = &update.permissions {
                info.permissions = permissions.clone();
            }
            if let Some(tags) = &update.tags {
                info.tags = tags.clone();
            }
        }
        for location in learned {
            self.publish(SessionEvent::LocationChecked { location });
        }
    }

    // -------------------------------------------------------------------------
    // Reconnection
    // -------------------------------------------------------------------------

    fn schedule_reconnect(&self) {
        let token = Arc::new(CancelToken::new());
        let mut inner = self.lock();
        if inner.user_disconnected || inner.params.is_none() {
            return;
        }
        if let Some(old) = inner.reconnect.replace(Arc::clone(&token)) {
            old.cancel();
        }
        inner.reconnecting = true;

        let delay = self.config.reconnect_delay;
        let weak = Weak::clone(&self.this);
        info!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        let spawned = thread::Builder::new()
            .name("mw-reconnect".into())
            .spawn(move || reconnect_thread(weak, token, delay));
        match spawned {
            Ok(handle) => inner.reconnect_thread = Some(handle),
            Err(e) => error!(error = %e, "failed to spawn reconnect thread"),
        }
    }

    fn reconnect_now(&self, token: &Arc<CancelToken>) {
        let params = {
            let mut inner = self.lock();
            let current = inner
                .reconnect
                .as_ref()
                .is_some_and(|t| Arc::ptr_eq(t, token));
            if !current || inner.user_disconnected || inner.state.is_active() {
                return;
            }
            inner.reconnect = None;
            let Some(params) = inner.params.clone() else {
                return;
            };
            inner.snapshot.reset();
            inner.room_info = None;
            inner.state = SessionState::Connecting;
            params
        };

        info!(host = %params.host, port = params.port, "reconnecting");
        if !self
            .transport
            .connect(&params.host, params.port, &params.path, false)
        {
            {
                let mut inner = self.lock();
                if inner.state == SessionState::Connecting {
                    inner.state = SessionState::Disconnected;
                }
            }
            self.schedule_reconnect();
        }
    }
}

fn reconnect_thread(core: Weak<SessionCore>, token: Arc<CancelToken>, delay: Duration) {
    if token.wait_timeout(delay) {
        return;
    }
    let Some(core) = core.upgrade() else {
        return;
    };
    let result = catch_unwind(AssertUnwindSafe(|| core.reconnect_now(&token)));
    if let Err(panic) = result {
        let message = panic_message(panic.as_ref());
        error!(panic = %message, "reconnect thread panicked");
        core.publish(SessionEvent::Error {
            kind: ErrorKind::ConnectionFailed,
            message,
        });
    }
}

impl Drop for SessionCore {
    fn drop(&mut self) {
        let handle = {
            let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
            inner.user_disconnected = true;
            inner.cancel_reconnect();
            inner.reconnect_thread.take()
        };
        self.transport.disconnect(close_code::GOING_AWAY, "");
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("reconnect thread panicked during shutdown");
            }
        }
    }
}

/// A client session with one multiworld server.
///
/// Not `Clone`: the application owns the session and drops it to shut down.
/// All methods are safe to call from any thread and never block on the
/// network.
pub struct Session {
    core: Arc<SessionCore>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        // Reconnection is a session policy; the transport must not retry on its own.
        let transport_config = TransportConfig {
            auto_reconnect: false,
            ..config.transport.clone()
        };
        let (events, receiver) = EventSink::channel();

        let core = Arc::new_cyclic(|this: &Weak<SessionCore>| {
            let transport = Transport::new(transport_config);
            transport.set_handler(Arc::new(SessionLink(Weak::clone(this))));
            SessionCore {
                config,
                session_id,
                transport,
                inner: Mutex::new(Inner::default()),
                events,
                receiver: Mutex::new(Some(receiver)),
                callbacks: Mutex::new(Callbacks::default()),
                messages_sent: AtomicU64::new(0),
                messages_received: AtomicU64::new(0),
                this: Weak::clone(this),
            }
        });
        debug!(session_id = %core.session_id, game = %core.config.game, "session created");
        Self { core }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    /// Start connecting. Returns false if a connection is already in progress
    /// or established, or the address cannot be used; an unusable address is
    /// also reported as an Error event.
    ///
    /// An empty `slot_name` stops the handshake after RoomInfo so the
    /// application can call [`Session::authenticate`].
    pub fn connect(&self, address: &str, port: u16, slot_name: &str, password: &str) -> bool {
        let url = match parse_address(address, port) {
            Ok(url) => url,
            Err(e) => {
                let error = SessionError::InvalidAddress(e);
                warn!(address, error = %error, "rejecting connect");
                self.core.publish_error(&error);
                return false;
            }
        };
        let params = ConnectParams {
            host: url.host,
            port: url.port,
            path: url.path,
            slot_name: slot_name.to_string(),
            password: password.to_string(),
        };

        {
            let mut inner = self.core.lock();
            if inner.state.is_active() {
                debug!(state = %inner.state, "connect ignored: session already active");
                return false;
            }
            if inner
                .params
                .as_ref()
                .is_none_or(|old| !old.same_target(&params))
            {
                inner.outbox.clear();
            }
            inner.cancel_reconnect();
            inner.user_disconnected = false;
            inner.snapshot.reset();
            inner.room_info = None;
            inner.params = Some(params.clone());
            inner.state = SessionState::Connecting;
        }

        info!(
            host = %params.host,
            port = params.port,
            slot = %params.slot_name,
            "connecting session"
        );
        if self
            .core
            .transport
            .connect(&params.host, params.port, &params.path, false)
        {
            return true;
        }
        let mut inner = self.core.lock();
        if inner.state == SessionState::Connecting {
            inner.state = SessionState::Disconnected;
        }
        false
    }

    /// Send the Connect packet for `slot_name`. Returns false if the transport
    /// is not connected or the session is already authenticated. Before
    /// RoomInfo arrives the credentials are stored and Connect follows it.
    pub fn authenticate(&self, slot_name: &str, password: &str) -> bool {
        let mut inner = self.core.lock();
        if !self.core.transport.is_connected() || inner.state == SessionState::Authenticated {
            return false;
        }
        let Some(params) = inner.params.as_mut() else {
            return false;
        };
        params.slot_name = slot_name.to_string();
        params.password = password.to_string();
        if inner.room_info.is_none() {
            debug!(slot = slot_name, "Connect deferred until RoomInfo");
            return true;
        }
        self.core.send_connect(&mut inner)
    }

    /// Close the connection. No Disconnected event follows and no reconnect
    /// is attempted.
    pub fn disconnect(&self) {
        {
            let mut inner = self.core.lock();
            inner.user_disconnected = true;
            inner.cancel_reconnect();
            inner.state = SessionState::Disconnected;
        }
        info!("session disconnect requested");
        self.core.transport.disconnect(close_code::NORMAL, "");
    }

    pub fn check_location(&self, location: i64) {
        self.check_locations(&[location]);
    }

    /// Mark locations checked. Each new id is announced once and all new ids
    /// go out in a single LocationChecks packet; already-checked ids are
    /// skipped. While a reconnect is pending the ids wait in the outbox.
    pub fn check_locations(&self, locations: &[i64]) {
        let core = &self.core;
        let mut inner = core.lock();
        let state = inner.state;
        match state {
            SessionState::Authenticated => {
                let fresh: Vec<i64> = locations
                    .iter()
                    .copied()
                    .filter(|&id| inner.snapshot.apply_check(id))
                    .collect();
                if fresh.is_empty() {
                    return;
                }
                for &location in &fresh {
                    inner.outbox.record(location, true);
                    core.publish(SessionEvent::LocationChecked { location });
                }
                core.send(&Packet::LocationChecks { locations: fresh });
            }
            _ if inner.reconnecting && !inner.user_disconnected => {
                for &location in locations {
                    if !inner.snapshot.is_checked(location) {
                        inner.outbox.record(location, false);
                    }
                }
                debug!(queued = inner.outbox.len(), "holding location checks until reconnected");
            }
            state => debug!(%state, "check ignored: not authenticated"),
        }
    }

    pub fn is_location_checked(&self, location: i64) -> bool {
        self.core.lock().snapshot.is_checked(location)
    }

    /// Locations checked locally that the server has not acknowledged yet.
    pub fn pending_checks(&self) -> Vec<i64> {
        self.core.lock().outbox.locations()
    }

    /// Update the local status and report it when authenticated. Returns
    /// whether a StatusUpdate was sent.
    pub fn update_status(&self, status: ClientStatus) -> bool {
        let mut inner = self.core.lock();
        inner.snapshot.status = status;
        if inner.state != SessionState::Authenticated {
            return false;
        }
        self.core.send(&Packet::StatusUpdate { status })
    }

    pub fn status(&self) -> ClientStatus {
        self.core.lock().snapshot.status
    }

    pub fn send_chat_message(&self, text: &str) -> bool {
        self.core.send_if_authenticated(&Packet::Say {
            text: text.to_string(),
        })
    }

    /// Allowed before authentication, once the transport is up.
    pub fn request_data_package(&self, games: &[String]) -> bool {
        if !self.core.transport.is_connected() {
            return false;
        }
        self.core.send(&Packet::GetDataPackage {
            games: games.to_vec(),
        })
    }

    pub fn sync_data(&self) -> bool {
        self.core.send_if_authenticated(&Packet::Sync)
    }

    pub fn scout_locations(&self, locations: &[i64], create_as_hint: i32) -> bool {
        self.core.send_if_authenticated(&Packet::LocationScouts {
            locations: locations.to_vec(),
            create_as_hint,
        })
    }

    pub fn pending_items(&self) -> Vec<NetworkItem> {
        self.core.lock().snapshot.pending_items().to_vec()
    }

    pub fn clear_pending_items(&self) {
        self.core.lock().snapshot.clear_pending_items();
    }

    pub fn received_item_count(&self) -> i32 {
        self.core.lock().snapshot.received_item_count()
    }

    pub fn players(&self) -> Vec<NetworkPlayer> {
        self.core.lock().snapshot.players.clone()
    }

    pub fn missing_locations(&self) -> Vec<i64> {
        self.core.lock().snapshot.missing_locations().to_vec()
    }

    pub fn checked_locations(&self) -> Vec<i64> {
        self.core.lock().snapshot.checked_locations().to_vec()
    }

    pub fn team(&self) -> i32 {
        self.core.lock().snapshot.team
    }

    pub fn slot(&self) -> i32 {
        self.core.lock().snapshot.slot
    }

    pub fn hint_points(&self) -> i32 {
        self.core.lock().snapshot.hint_points
    }

    pub fn room_info(&self) -> Option<RoomInfo> {
        self.core.lock().room_info.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.core.lock().snapshot.clone()
    }

    pub fn session_id(&self) -> &str {
        &self.core.session_id
    }

    pub fn messages_sent(&self) -> u64 {
        self.core.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.core.messages_received.load(Ordering::Relaxed)
    }

    pub fn transport_stats(&self) -> StatsSnapshot {
        self.core.transport.stats()
    }

    /// Wait until queued packets are on the wire.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.core.transport.flush(timeout)
    }

    pub fn state(&self) -> SessionState {
        self.core.lock().state
    }

    /// True only once the server accepted Connect.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Take the event receiver. After this, `poll_events` returns 0 and the
    /// registered callbacks never run.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        lock(&self.core.receiver).take()
    }

    /// Drain queued events and run the registered callbacks on the calling
    /// thread. Returns the number of events handled.
    pub fn poll_events(&self) -> usize {
        let events: Vec<SessionEvent> = {
            let mut receiver = lock(&self.core.receiver);
            let Some(rx) = receiver.as_mut() else {
                return 0;
            };
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        // Run without the lock held so callbacks can call the `on_*` setters.
        let mut running = std::mem::take(&mut *lock(&self.core.callbacks));
        for event in &events {
            running.dispatch(event);
        }
        lock(&self.core.callbacks).restore(running);
        events.len()
    }

    pub fn on_connected(&self, f: impl FnMut() + Send + 'static) {
        lock(&self.core.callbacks).connected = Some(Box::new(f));
    }

    pub fn on_disconnected(&self, f: impl FnMut(u16, &str) + Send + 'static) {
        lock(&self.core.callbacks).disconnected = Some(Box::new(f));
    }

    pub fn on_item_received(&self, f: impl FnMut(&NetworkItem) + Send + 'static) {
        lock(&self.core.callbacks).item_received = Some(Box::new(f));
    }

    pub fn on_location_checked(&self, f: impl FnMut(i64) + Send + 'static) {
        lock(&self.core.callbacks).location_checked = Some(Box::new(f));
    }

    pub fn on_chat_message(&self, f: impl FnMut(&str) + Send + 'static) {
        lock(&self.core.callbacks).chat_message = Some(Box::new(f));
    }

    pub fn on_locations_scouted(&self, f: impl FnMut(&[NetworkItem]) + Send + 'static) {
        lock(&self.core.callbacks).locations_scouted = Some(Box::new(f));
    }

    pub fn on_error(&self, f: impl FnMut(ErrorKind, &str) + Send + 'static) {
        lock(&self.core.callbacks).error = Some(Box::new(f));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_address_forms() {
        let url = parse_address("archipelago.gg", 38281).unwrap();
        assert_eq!((url.host.as_str(), url.port, url.path.as_str()), ("archipelago.gg", 38281, "/"));

        let url = parse_address("localhost:9000", 38281).unwrap();
        assert_eq!(url.port, 9000);

        let url = parse_address("ws://localhost/room", 38281).unwrap();
        assert_eq!(url.port, 38281);
        assert_eq!(url.path, "/room");

        assert!(matches!(
            parse_address("wss://archipelago.gg", 38281),
            Err(WsError::UnsupportedScheme(_))
        ));
        assert!(parse_address("", 38281).is_err());
    }

    #[test]
    fn state_activity() {
        assert!(!SessionState::Disconnected.is_active());
        assert!(!SessionState::Failed.is_active());
        assert!(SessionState::WaitingForRoomInfo.is_active());
        assert_eq!(SessionState::Authenticated.to_string(), "authenticated");
    }

    #[test]
    fn new_session_is_idle() {
        let session = Session::default();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_connected());
        assert!(Uuid::parse_str(session.session_id()).is_ok());
        assert_eq!(session.status(), ClientStatus::Unknown);
    }

    #[test]
    fn configured_session_id_is_kept() {
        let config = SessionConfig {
            session_id: Some("fixed-id".into()),
            ..SessionConfig::default()
        };
        assert_eq!(Session::new(config).session_id(), "fixed-id");
    }

    #[test]
    fn operations_are_noops_when_disconnected() {
        let session = Session::default();
        session.check_location(5);
        assert!(!session.is_location_checked(5));
        assert!(!session.send_chat_message("hi"));
        assert!(!session.sync_data());
        assert!(!session.request_data_package(&[]));
        assert!(!session.scout_locations(&[1], 0));
        assert!(!session.authenticate("Dawn", ""));
        assert!(!session.update_status(ClientStatus::Goal));
        assert_eq!(session.status(), ClientStatus::Goal);
        assert_eq!(session.messages_sent(), 0);
        assert_eq!(session.poll_events(), 0);
    }

    #[test]
    fn wss_address_is_rejected_with_error_event() {
        let session = Session::default();
        let mut events = session.take_events().unwrap();
        assert!(!session.connect("wss://archipelago.gg", 38281, "Dawn", ""));
        assert_eq!(session.state(), SessionState::Disconnected);
        match events.try_recv() {
            Ok(SessionEvent::Error { kind, .. }) => assert_eq!(kind, ErrorKind::ConnectionFailed),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn poll_events_runs_callbacks_on_caller() {
        let session = Session::default();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        session.on_error(move |kind, message| sink.lock().unwrap().push((kind, message.to_string())));

        session.connect("ws://", 38281, "Dawn", "");
        assert_eq!(session.poll_events(), 1);
        assert_eq!(errors.lock().unwrap()[0].0, ErrorKind::ConnectionFailed);

        assert!(session.take_events().is_some());
        assert_eq!(session.poll_events(), 0);
    }

    #[test]
    fn callbacks_can_register_callbacks() {
        let session = Arc::new(Session::default());
        let errors = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&session);
        let sink = Arc::clone(&errors);
        session.on_error(move |_, message| {
            sink.lock().unwrap().push(format!("first: {message}"));
            if let Some(session) = weak.upgrade() {
                let sink = Arc::clone(&sink);
                session.on_error(move |_, message| {
                    sink.lock().unwrap().push(format!("second: {message}"));
                });
            }
        });

        session.connect("ws://", 38281, "Dawn", "");
        assert_eq!(session.poll_events(), 1);
        session.connect("ws://", 38281, "Dawn", "");
        assert_eq!(session.poll_events(), 1);

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("first: "));
        assert!(errors[1].starts_with("second: "));
    }
}
