//! Threaded WebSocket client transport.
//!
//! Each connection gets a short-lived connect thread (resolve, TCP connect,
//! upgrade handshake) which hands the socket to a dedicated I/O thread. The
//! I/O thread owns the socket and alternates between writing everything in
//! the outbound queue and a socket read bounded by `poll_interval`, so a
//! blocking read never starves senders.
//!
//! Every connection attempt is tagged with a generation number. Background
//! threads only touch shared state while their generation is current, which
//! makes `disconnect` and a racing connection loss safe to interleave.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::error::WsError;
use crate::frame::{Frame, FrameDecoder, Incoming, MessageAssembler, close_code};
use crate::handshake;
use crate::queue::{OutboundKind, OutboundMessage, OutboundQueue};
use crate::socket::{Recv, Socket};
use crate::stats::{StatsSnapshot, TransportStats};
use crate::timer::{CancelToken, panic_message};
use crate::url::WsUrl;

const READ_CHUNK: usize = 16 * 1024;

/// Runtime transport settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// Bound on TCP connect and on the upgrade handshake.
    pub connect_timeout: Duration,
    /// Socket read timeout of the I/O loop.
    pub poll_interval: Duration,
    /// Send a Ping after this long without writing anything.
    pub ping_interval: Option<Duration>,
    /// Largest accepted frame payload and reassembled message.
    pub max_message_size: usize,
    /// Reconnect on connection loss. Off by default; the session layer runs
    /// its own policy.
    pub auto_reconnect: bool,
    pub reconnect_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(10_000),
            poll_interval: Duration::from_millis(10),
            ping_interval: Some(Duration::from_secs(30)),
            max_message_size: 16 * 1024 * 1024,
            auto_reconnect: false,
            reconnect_delay: Duration::from_millis(3_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Closing = 3,
    Failed = 4,
}

impl TransportState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Closing,
            4 => Self::Failed,
            _ => Self::Disconnected,
        }
    }
}

/// Inbound data delivered to the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
    Pong(Vec<u8>),
}

/// Transport event sink. Methods run on the transport's background threads,
/// never while the transport holds its internal locks, so they may call back
/// into the transport (including `disconnect`).
pub trait TransportHandler: Send + Sync {
    fn on_connected(&self) {}
    fn on_disconnected(&self, _code: u16, _reason: &str) {}
    fn on_message(&self, _message: Message) {}
    fn on_error(&self, _error: &WsError) {}
}

/// Owned copy of a transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected { code: u16, reason: String },
    Message(Message),
    Error { code: &'static str, message: String },
}

/// Handler that forwards every event into an unbounded channel.
#[derive(Debug)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl ChannelHandler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn send(&self, event: TransportEvent) {
        // The receiver going away just means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}

impl TransportHandler for ChannelHandler {
    fn on_connected(&self) {
        self.send(TransportEvent::Connected);
    }

    fn on_disconnected(&self, code: u16, reason: &str) {
        self.send(TransportEvent::Disconnected {
            code,
            reason: reason.to_string(),
        });
    }

    fn on_message(&self, message: Message) {
        self.send(TransportEvent::Message(message));
    }

    fn on_error(&self, error: &WsError) {
        self.send(TransportEvent::Error {
            code: error.error_code(),
            message: error.to_string(),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    host: String,
    port: u16,
    path: String,
}

/// Per-attempt state shared by the connect and I/O threads.
#[derive(Debug)]
struct Connection {
    generation: u64,
    cancel: CancelToken,
    queue: OutboundQueue,
}

#[derive(Default)]
struct Lifecycle {
    generation: u64,
    current: Option<Arc<Connection>>,
    /// Where to reconnect to; cleared by an explicit disconnect.
    target: Option<Target>,
    reconnect: Option<Arc<CancelToken>>,
    threads: Vec<JoinHandle<()>>,
    shutting_down: bool,
}

impl Lifecycle {
    fn is_current(&self, conn: &Connection) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| c.generation == conn.generation)
    }

    fn track(&mut self, handle: JoinHandle<()>) {
        self.threads.retain(|h| !h.is_finished());
        self.threads.push(handle);
    }
}

struct Shared {
    config: TransportConfig,
    state: AtomicU8,
    lifecycle: Mutex<Lifecycle>,
    stats: TransportStats,
    handler: RwLock<Option<Arc<dyn TransportHandler>>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The only place the state changes. Callers hold the lifecycle lock.
    fn set_state(&self, state: TransportState) {
        let prev = self.state.swap(state as u8, Ordering::AcqRel);
        if prev != state as u8 {
            trace!(from = ?TransportState::from_u8(prev), to = ?state, "transport state");
        }
    }

    fn handler(&self) -> Option<Arc<dyn TransportHandler>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn emit(&self, f: impl FnOnce(&dyn TransportHandler)) {
        if let Some(handler) = self.handler() {
            f(handler.as_ref());
        }
    }

    fn emit_error(&self, error: &WsError) {
        self.emit(|h| h.on_error(error));
    }

    /// Begin a connection attempt to `target`.
    fn start(self: &Arc<Self>, target: Target) -> bool {
        let mut lc = self.lock();
        if lc.shutting_down {
            return false;
        }
        match self.state() {
            TransportState::Connecting | TransportState::Connected => {
                debug!(state = ?self.state(), "connect ignored: already active");
                return false;
            }
            _ => {}
        }

        if let Some(old) = lc.current.take() {
            old.cancel.cancel();
        }
        if let Some(timer) = lc.reconnect.take() {
            timer.cancel();
        }

        lc.generation += 1;
        let conn = Arc::new(Connection {
            generation: lc.generation,
            cancel: CancelToken::new(),
            queue: OutboundQueue::new(),
        });
        lc.current = Some(Arc::clone(&conn));
        lc.target = Some(target.clone());
        self.set_state(TransportState::Connecting);

        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("ws-connect".into())
            .spawn(move || connect_thread(shared, conn, target));
        match spawned {
            Ok(handle) => {
                lc.track(handle);
                true
            }
            Err(e) => {
                error!(error = %e, "failed to spawn connect thread");
                lc.current = None;
                self.set_state(TransportState::Failed);
                false
            }
        }
    }

    fn current(&self) -> Option<Arc<Connection>> {
        self.lock().current.clone()
    }

    fn enqueue(&self, kind: OutboundKind, payload: Vec<u8>) -> bool {
        if self.state() != TransportState::Connected {
            return false;
        }
        let lc = self.lock();
        match (&lc.current, self.state()) {
            (Some(conn), TransportState::Connected) => {
                conn.queue.push(OutboundMessage::new(kind, payload));
                true
            }
            _ => false,
        }
    }

    /// Tear down the current connection without publishing events.
    fn stop(&self, code: u16, reason: &str) {
        let mut lc = self.lock();
        lc.target = None;
        if let Some(timer) = lc.reconnect.take() {
            timer.cancel();
        }
        let was_connected = self.state() == TransportState::Connected;
        if let Some(conn) = lc.current.take() {
            if was_connected {
                conn.queue.push(OutboundMessage::new(
                    OutboundKind::Close,
                    Frame::close(code, reason).payload,
                ));
            }
            conn.cancel.cancel();
            debug!(generation = conn.generation, code, "disconnect requested");
        }
        self.set_state(TransportState::Disconnected);
    }

    /// Connection attempt failed before the handshake completed.
    fn connect_failed(self: &Arc<Self>, conn: &Connection, error: WsError) {
        {
            let mut lc = self.lock();
            if !lc.is_current(conn) {
                return;
            }
            lc.current = None;
            self.set_state(TransportState::Failed);
        }
        warn!(error = %error, "websocket connection failed");
        self.emit_error(&error);
        self.schedule_reconnect();
    }

    /// An established connection ended without an explicit disconnect.
    fn connection_ended(
        self: &Arc<Self>,
        conn: &Connection,
        code: u16,
        reason: &str,
        error: Option<WsError>,
    ) {
        {
            let mut lc = self.lock();
            if !lc.is_current(conn) {
                return;
            }
            lc.current = None;
            self.set_state(if error.is_some() {
                TransportState::Failed
            } else {
                TransportState::Disconnected
            });
        }

        if let Some(error) = error {
            warn!(error = %error, "websocket connection failed");
            self.emit_error(&error);
            // A connect issued from the error handler wins over this.
            let _ = self.state.compare_exchange(
                TransportState::Failed as u8,
                TransportState::Disconnected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        info!(code, reason, "websocket disconnected");
        self.emit(|h| h.on_disconnected(code, reason));
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if !self.config.auto_reconnect {
            return;
        }
        let mut lc = self.lock();
        if lc.shutting_down || lc.current.is_some() {
            return;
        }
        let Some(target) = lc.target.clone() else {
            return;
        };
        let timer = Arc::new(CancelToken::new());
        if let Some(old) = lc.reconnect.replace(Arc::clone(&timer)) {
            old.cancel();
        }

        let shared = Arc::clone(self);
        let delay = self.config.reconnect_delay;
        info!(delay_ms = delay.as_millis() as u64, host = %target.host, "scheduling reconnect");
        let spawned = thread::Builder::new()
            .name("ws-reconnect".into())
            .spawn(move || {
                if timer.wait_timeout(delay) {
                    return;
                }
                let still_wanted = {
                    let mut lc = shared.lock();
                    let wanted = !timer.is_cancelled() && lc.target.as_ref() == Some(&target);
                    if wanted {
                        lc.reconnect = None;
                    }
                    wanted
                };
                if still_wanted {
                    shared.start(target);
                }
            });
        match spawned {
            Ok(handle) => lc.track(handle),
            Err(e) => error!(error = %e, "failed to spawn reconnect thread"),
        }
    }
}

/// Threaded WebSocket client. Not `Clone`; dropping it stops and joins all
/// background threads except the one doing the drop.
pub struct Transport {
    shared: Arc<Shared>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: AtomicU8::new(TransportState::Disconnected as u8),
                lifecycle: Mutex::new(Lifecycle::default()),
                stats: TransportStats::new(),
                handler: RwLock::new(None),
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    pub fn set_handler(&self, handler: Arc<dyn TransportHandler>) {
        *self
            .shared
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Start connecting in the background. Returns false if a connection is
    /// already active or `secure` is requested; the outcome of an accepted
    /// attempt arrives through the handler.
    pub fn connect(&self, host: &str, port: u16, path: &str, secure: bool) -> bool {
        if secure {
            let error = WsError::UnsupportedScheme("wss".into());
            warn!(host, port, "{error}");
            self.shared.emit_error(&error);
            return false;
        }
        let path = if path.is_empty() { "/" } else { path };
        info!(host, port, path, "connecting");
        self.shared.start(Target {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// Parse a `ws://` URL and connect to it.
    pub fn connect_url(&self, url: &str) -> bool {
        match WsUrl::parse(url) {
            Ok(url) => self.connect(&url.host, url.port, &url.path, false),
            Err(error) => {
                warn!(url, error = %error, "rejecting connect");
                self.shared.emit_error(&error);
                false
            }
        }
    }

    /// Close the connection. Idempotent and safe from any thread, including
    /// inside handler callbacks. Publishes no Disconnected event.
    pub fn disconnect(&self, code: u16, reason: &str) {
        self.shared.stop(code, reason);
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.shared
            .enqueue(OutboundKind::Text, text.into().into_bytes())
    }

    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> bool {
        self.shared.enqueue(OutboundKind::Binary, data.into())
    }

    pub fn send_ping(&self, data: impl Into<Vec<u8>>) -> bool {
        let mut data = data.into();
        data.truncate(crate::frame::MAX_CONTROL_PAYLOAD);
        self.shared.enqueue(OutboundKind::Ping, data)
    }

    pub fn state(&self) -> TransportState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == TransportState::Connected
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Wait until everything queued so far has been written to the socket.
    /// Returns false on timeout or when there is no connection.
    pub fn flush(&self, timeout: Duration) -> bool {
        match self.shared.current() {
            Some(conn) => conn.queue.wait_drained(timeout),
            None => false,
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        let threads = {
            let mut lc = self.shared.lock();
            lc.shutting_down = true;
            std::mem::take(&mut lc.threads)
        };
        self.shared.stop(close_code::GOING_AWAY, "");

        let me = thread::current().id();
        for handle in threads {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                error!("transport thread panicked during shutdown");
            }
        }
    }
}

fn connect_thread(shared: Arc<Shared>, conn: Arc<Connection>, target: Target) {
    let result = catch_unwind(AssertUnwindSafe(|| establish(&shared.config, &conn, &target)));
    let (socket, leftover) = match result {
        Ok(Ok(established)) => established,
        Ok(Err(error)) => return shared.connect_failed(&conn, error),
        Err(panic) => {
            let error = WsError::Panicked(panic_message(panic.as_ref()));
            return shared.connect_failed(&conn, error);
        }
    };

    let mut lc = shared.lock();
    if lc.shutting_down || !lc.is_current(&conn) || conn.cancel.is_cancelled() {
        socket.shutdown();
        return;
    }
    shared.set_state(TransportState::Connected);
    shared.stats.record_connection();
    info!(host = %target.host, port = target.port, path = %target.path, "websocket connected");

    let io_shared = Arc::clone(&shared);
    let io_conn = Arc::clone(&conn);
    let spawned = thread::Builder::new()
        .name("ws-io".into())
        .spawn(move || io_thread(io_shared, io_conn, socket, leftover));
    match spawned {
        Ok(handle) => lc.track(handle),
        Err(e) => {
            drop(lc);
            shared.connect_failed(&conn, WsError::Io(e));
        }
    }
}

fn establish(
    config: &TransportConfig,
    conn: &Connection,
    target: &Target,
) -> Result<(Socket, Vec<u8>), WsError> {
    let mut socket = Socket::connect(&target.host, target.port, config.connect_timeout)?;
    socket.set_read_timeout(config.poll_interval)?;
    socket.set_write_timeout(config.connect_timeout)?;
    let leftover = handshake::perform(
        &mut socket,
        &target.host,
        target.port,
        &target.path,
        config.connect_timeout,
        &conn.cancel,
    )?;
    Ok((socket, leftover))
}

/// Why the I/O loop stopped.
enum Ending {
    /// Explicit disconnect or superseded connection.
    Stopped,
    PeerClosed(crate::frame::CloseFrame),
    Protocol(crate::frame::FrameError),
    Lost(WsError),
}

fn io_thread(shared: Arc<Shared>, conn: Arc<Connection>, mut socket: Socket, leftover: Vec<u8>) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut io = IoLoop::new(&shared, &conn, leftover);
        let ending = io.run(&mut socket);
        io.finish(&mut socket, ending);
    }));
    socket.shutdown();
    conn.queue.clear();
    if let Err(panic) = result {
        let message = panic_message(panic.as_ref());
        error!(panic = %message, "websocket I/O thread panicked");
        shared.connection_ended(
            &conn,
            close_code::ABNORMAL,
            &message,
            Some(WsError::Panicked(message.clone())),
        );
    }
}

struct IoLoop<'a> {
    shared: &'a Arc<Shared>,
    conn: &'a Connection,
    decoder: FrameDecoder,
    assembler: MessageAssembler,
    last_write: Instant,
}

impl<'a> IoLoop<'a> {
    fn new(shared: &'a Arc<Shared>, conn: &'a Connection, leftover: Vec<u8>) -> Self {
        let max = shared.config.max_message_size;
        let mut decoder = FrameDecoder::new(max);
        decoder.feed(&leftover);
        Self {
            shared,
            conn,
            decoder,
            assembler: MessageAssembler::new(max),
            last_write: Instant::now(),
        }
    }

    fn run(&mut self, socket: &mut Socket) -> Ending {
        self.shared.emit(|h| h.on_connected());

        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            if self.conn.cancel.is_cancelled() {
                // Flush what was queued before the disconnect, Close included.
                if let Err(e) = self.write_pending(socket) {
                    debug!(error = %e, "flush on disconnect failed");
                }
                return Ending::Stopped;
            }

            match self.write_pending(socket) {
                Ok(true) => return Ending::Stopped,
                Ok(false) => {}
                Err(e) => return Ending::Lost(WsError::ConnectionLost(e.to_string())),
            }

            if let Err(e) = self.keep_alive(socket) {
                return Ending::Lost(WsError::ConnectionLost(e.to_string()));
            }

            if let Some(ending) = self.dispatch_buffered(socket) {
                return ending;
            }

            match socket.recv(&mut buf) {
                Ok(Recv::Data(n)) => {
                    self.shared.stats.record_read(n);
                    self.decoder.feed(&buf[..n]);
                }
                Ok(Recv::Timeout) => {}
                Ok(Recv::Closed) => {
                    return Ending::Lost(WsError::ConnectionLost(
                        "connection closed by peer".into(),
                    ));
                }
                Err(e) => return Ending::Lost(WsError::ConnectionLost(e.to_string())),
            }
        }
    }

    /// Decode and deliver every complete frame currently buffered.
    fn dispatch_buffered(&mut self, socket: &mut Socket) -> Option<Ending> {
        loop {
            let frame = match self.decoder.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return None,
                Err(e) => return Some(Ending::Protocol(e)),
            };
            if frame.is_masked() {
                return Some(Ending::Protocol(crate::frame::FrameError::MaskedServerFrame));
            }
            if self.conn.cancel.is_cancelled() {
                return Some(Ending::Stopped);
            }

            let incoming = match self.assembler.push(frame) {
                Ok(Some(incoming)) => incoming,
                Ok(None) => continue,
                Err(e) => return Some(Ending::Protocol(e)),
            };
            match incoming {
                Incoming::Text(text) => {
                    self.shared.stats.record_message();
                    self.shared.emit(|h| h.on_message(Message::Text(text)));
                }
                Incoming::Binary(data) => {
                    self.shared.stats.record_message();
                    self.shared.emit(|h| h.on_message(Message::Binary(data)));
                }
                Incoming::Ping(data) => {
                    trace!(len = data.len(), "ping received");
                    if let Err(e) = self.write_frame(socket, Frame::pong(data)) {
                        return Some(Ending::Lost(WsError::ConnectionLost(e.to_string())));
                    }
                }
                Incoming::Pong(data) => {
                    self.shared.stats.record_pong();
                    self.shared.emit(|h| h.on_message(Message::Pong(data)));
                }
                Incoming::Close(close) => return Some(Ending::PeerClosed(close)),
            }
        }
    }

    /// Write the queued batch in order. Returns true if a Close went out.
    fn write_pending(&mut self, socket: &mut Socket) -> std::io::Result<bool> {
        let batch = self.conn.queue.drain();
        if batch.is_empty() {
            return Ok(false);
        }
        let mut closed = false;
        for message in batch {
            if closed {
                break;
            }
            closed = message.kind == OutboundKind::Close;
            if message.kind == OutboundKind::Ping {
                self.shared.stats.record_ping();
            }
            self.write_frame(socket, message.into_frame())?;
        }
        self.conn.queue.mark_written();
        Ok(closed)
    }

    fn keep_alive(&mut self, socket: &mut Socket) -> std::io::Result<()> {
        let Some(interval) = self.shared.config.ping_interval else {
            return Ok(());
        };
        if self.last_write.elapsed() >= interval {
            trace!("sending keep-alive ping");
            self.shared.stats.record_ping();
            self.write_frame(socket, Frame::ping(Vec::new()))?;
        }
        Ok(())
    }

    fn write_frame(&mut self, socket: &mut Socket, frame: Frame) -> std::io::Result<()> {
        let is_data = !frame.opcode.is_control();
        let bytes = frame.with_random_mask().encode();
        socket.send_all(&bytes)?;
        self.shared.stats.record_sent(bytes.len(), is_data);
        self.last_write = Instant::now();
        Ok(())
    }

    fn finish(&mut self, socket: &mut Socket, ending: Ending) {
        match ending {
            Ending::Stopped => {
                debug!(generation = self.conn.generation, "I/O loop stopped");
            }
            Ending::PeerClosed(close) => {
                debug!(code = close.code, reason = %close.reason, "server closed connection");
                {
                    let lc = self.shared.lock();
                    if lc.is_current(self.conn) {
                        self.shared.set_state(TransportState::Closing);
                    }
                }
                if let Err(e) = self.write_frame(socket, Frame::close(close.code, "")) {
                    debug!(error = %e, "close echo failed");
                }
                self.shared
                    .connection_ended(self.conn, close.code, &close.reason, None);
            }
            Ending::Protocol(e) => {
                warn!(error = %e, "websocket protocol error");
                let code = e.close_code();
                let reason = e.to_string();
                if let Err(write_err) = self.write_frame(socket, Frame::close(code, &reason)) {
                    debug!(error = %write_err, "close after protocol error failed");
                }
                self.shared
                    .connection_ended(self.conn, code, &reason, Some(WsError::Protocol(e)));
            }
            Ending::Lost(e) => {
                let reason = e.to_string();
                self.shared
                    .connection_ended(self.conn, close_code::ABNORMAL, &reason, Some(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.ping_interval, Some(Duration::from_secs(30)));
        assert!(!config.auto_reconnect);
    }

    #[test]
    fn sends_rejected_while_disconnected() {
        let transport = Transport::new(TransportConfig::default());
        assert_eq!(transport.state(), TransportState::Disconnected);
        assert!(!transport.send_text("hello"));
        assert!(!transport.send_binary(vec![1, 2, 3]));
        assert!(!transport.send_ping(Vec::new()));
        assert!(!transport.flush(Duration::from_millis(1)));
    }

    #[test]
    fn secure_connect_is_rejected_with_error_event() {
        let transport = Transport::new(TransportConfig::default());
        let (handler, mut rx) = ChannelHandler::new();
        transport.set_handler(handler);

        assert!(!transport.connect("example.com", 443, "/", true));
        assert_eq!(transport.state(), TransportState::Disconnected);
        match rx.try_recv() {
            Ok(TransportEvent::Error { code, .. }) => assert_eq!(code, "unsupported_scheme"),
            other => panic!("expected error event, got {other:?}"),
        }

        assert!(!transport.connect_url("wss://example.com/"));
        assert!(matches!(rx.try_recv(), Ok(TransportEvent::Error { .. })));
    }

    #[test]
    fn disconnect_is_idempotent() {
        let transport = Transport::new(TransportConfig::default());
        transport.disconnect(close_code::NORMAL, "");
        transport.disconnect(close_code::NORMAL, "");
        assert_eq!(transport.state(), TransportState::Disconnected);
    }

    #[test]
    fn refused_connect_fails_without_disconnect_event() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = Transport::new(TransportConfig::default());
        let (handler, mut rx) = ChannelHandler::new();
        transport.set_handler(handler);
        assert!(transport.connect("127.0.0.1", port, "/", false));

        match rx.blocking_recv() {
            Some(TransportEvent::Error { code, .. }) => assert_eq!(code, "connect_failed"),
            other => panic!("expected connect error, got {other:?}"),
        }
        assert_eq!(transport.state(), TransportState::Failed);
        std::thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err());
    }
}
