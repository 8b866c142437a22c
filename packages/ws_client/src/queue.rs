//! Outbound message queue shared between senders and the I/O thread.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::frame::{Frame, Opcode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundKind {
    Text,
    Binary,
    Ping,
    /// Appended by `disconnect` so earlier messages are written first.
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub kind: OutboundKind,
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    pub fn new(kind: OutboundKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Unmasked frame for this message; the writer masks it.
    pub fn into_frame(self) -> Frame {
        let opcode = match self.kind {
            OutboundKind::Text => Opcode::Text,
            OutboundKind::Binary => Opcode::Binary,
            OutboundKind::Ping => Opcode::Ping,
            OutboundKind::Close => Opcode::Close,
        };
        Frame::new(opcode, self.payload)
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    pending: VecDeque<OutboundMessage>,
    /// Messages taken by the writer but not yet confirmed written.
    in_flight: usize,
}

/// FIFO with a single consumer. Senders never block on the network; the
/// condition variable only wakes `wait_drained` callers.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    inner: Mutex<QueueInner>,
    drained: Condvar,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, message: OutboundMessage) {
        self.lock().pending.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take everything queued so far, in order. The caller must follow up
    /// with [`mark_written`](Self::mark_written).
    pub fn drain(&self) -> Vec<OutboundMessage> {
        let mut inner = self.lock();
        let batch: Vec<_> = inner.pending.drain(..).collect();
        inner.in_flight = batch.len();
        batch
    }

    pub fn mark_written(&self) {
        let mut inner = self.lock();
        inner.in_flight = 0;
        if inner.pending.is_empty() {
            self.drained.notify_all();
        }
    }

    /// Drop everything queued; used when a connection ends.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.pending.clear();
        inner.in_flight = 0;
        self.drained.notify_all();
    }

    /// Block until the queue is empty and nothing is in flight, or `timeout`
    /// passes. Returns whether the queue drained.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if inner.pending.is_empty() && inner.in_flight == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            inner = self
                .drained
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn drain_preserves_order() {
        let queue = OutboundQueue::new();
        queue.push(OutboundMessage::new(OutboundKind::Text, "a"));
        queue.push(OutboundMessage::new(OutboundKind::Binary, vec![1]));
        queue.push(OutboundMessage::new(OutboundKind::Close, vec![]));

        let batch = queue.drain();
        let kinds: Vec<_> = batch.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![OutboundKind::Text, OutboundKind::Binary, OutboundKind::Close]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn wait_drained_tracks_in_flight() {
        let queue = Arc::new(OutboundQueue::new());
        assert!(queue.wait_drained(Duration::from_millis(1)));

        queue.push(OutboundMessage::new(OutboundKind::Text, "x"));
        assert!(!queue.wait_drained(Duration::from_millis(10)));

        let _batch = queue.drain();
        assert!(!queue.wait_drained(Duration::from_millis(10)));

        let writer = Arc::clone(&queue);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.mark_written();
        });
        assert!(queue.wait_drained(Duration::from_secs(2)));
        handle.join().unwrap();
    }

    #[test]
    fn frame_opcodes() {
        assert_eq!(
            OutboundMessage::new(OutboundKind::Ping, vec![]).into_frame().opcode,
            Opcode::Ping
        );
        assert_eq!(
            OutboundMessage::new(OutboundKind::Text, "t").into_frame().opcode,
            Opcode::Text
        );
    }
}
