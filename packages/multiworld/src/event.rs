//! Application-facing session events.
//!
//! Network threads publish [`SessionEvent`]s into an unbounded channel and
//! never run application code. The application either takes the receiver or
//! drains it with `Session::poll_events`, which runs the registered
//! [`Callbacks`] on the polling thread.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::ErrorKind;
use crate::packet::NetworkItem;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Authentication succeeded.
    Connected,
    Disconnected {
        code: u16,
        reason: String,
    },
    ItemReceived {
        item: NetworkItem,
    },
    LocationChecked {
        location: i64,
    },
    ChatMessage {
        text: String,
    },
    LocationsScouted {
        items: Vec<NetworkItem>,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        // No receiver means the application stopped listening.
        let _ = self.tx.send(event);
    }
}

/// Callbacks run by `Session::poll_events`. A callback may register or
/// replace callbacks; the change applies from the next poll.
#[derive(Default)]
pub struct Callbacks {
    pub(crate) connected: Option<Box<dyn FnMut() + Send>>,
    pub(crate) disconnected: Option<Box<dyn FnMut(u16, &str) + Send>>,
    pub(crate) item_received: Option<Box<dyn FnMut(&NetworkItem) + Send>>,
    pub(crate) location_checked: Option<Box<dyn FnMut(i64) + Send>>,
    pub(crate) chat_message: Option<Box<dyn FnMut(&str) + Send>>,
    pub(crate) locations_scouted: Option<Box<dyn FnMut(&[NetworkItem]) + Send>>,
    pub(crate) error: Option<Box<dyn FnMut(ErrorKind, &str) + Send>>,
}

impl Callbacks {
    /// Put back callbacks taken out for dispatch. Slots registered in the
    /// meantime win over the ones being restored.
    pub(crate) fn restore(&mut self, taken: Callbacks) {
        fn keep<T>(slot: &mut Option<T>, taken: Option<T>) {
            if slot.is_none() {
                *slot = taken;
            }
        }
        keep(&mut self.connected, taken.connected);
        keep(&mut self.disconnected, taken.disconnected);
        keep(&mut self.item_received, taken.item_received);
        keep(&mut self.location_checked, taken.location_checked);
        keep(&mut self.chat_message, taken.chat_message);
        keep(&mut self.locations_scouted, taken.locations_scouted);
        keep(&mut self.error, taken.error);
    }

    pub fn dispatch(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Connected => {
                if let Some(f) = self.connected.as_mut() {
                    f();
                }
            }
            SessionEvent::Disconnected { code, reason } => {
                if let Some(f) = self.disconnected.as_mut() {
                    f(*code, reason);
                }
            }
            SessionEvent::ItemReceived { item } => {
                if let Some(f) = self.item_received.as_mut() {
                    f(item);
                }
            }
            SessionEvent::LocationChecked { location } => {
                if let Some(f) = self.location_checked.as_mut() {
                    f(*location);
                }
            }
            SessionEvent::ChatMessage { text } => {
                if let Some(f) = self.chat_message.as_mut() {
                    f(text);
                }
            }
            SessionEvent::LocationsScouted { items } => {
                if let Some(f) = self.locations_scouted.as_mut() {
                    f(items);
                }
            }
            SessionEvent::Error { kind, message } => {
                if let Some(f) = self.error.as_mut() {
                    f(*kind, message);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(SessionEvent::LocationChecked { location: 42 }).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "location_checked", "location": 42})
        );
        let json = serde_json::to_value(SessionEvent::Error {
            kind: ErrorKind::AuthenticationFailed,
            message: "nope".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "authentication_failed");
    }

    #[test]
    fn dispatch_runs_matching_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut callbacks = Callbacks::default();
        let sink = Arc::clone(&seen);
        callbacks.location_checked = Some(Box::new(move |id| sink.lock().unwrap().push(id)));

        callbacks.dispatch(&SessionEvent::LocationChecked { location: 7 });
        callbacks.dispatch(&SessionEvent::Connected);
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[test]
    fn sink_survives_dropped_receiver() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.publish(SessionEvent::Connected);
    }
}
