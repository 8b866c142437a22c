//! Transport counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct TransportStats {
    /// Data messages written (Text/Binary)
    pub messages_sent: AtomicU64,
    /// Data messages delivered to the handler
    pub messages_received: AtomicU64,
    /// Frame bytes written, headers included
    pub bytes_sent: AtomicU64,
    /// Raw bytes read from the socket
    pub bytes_received: AtomicU64,
    pub pings_sent: AtomicU64,
    pub pongs_received: AtomicU64,
    /// Successful handshakes
    pub connections: AtomicU64,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, bytes: usize, is_data: bool) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        if is_data {
            self.messages_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_read(&self, bytes: usize) {
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ping(&self) {
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pong(&self) {
        self.pongs_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
            pongs_received: self.pongs_received.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`TransportStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub pings_sent: u64,
    pub pongs_received: u64,
    pub connections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_default() {
        let snapshot = TransportStats::new().snapshot();
        assert_eq!(snapshot, StatsSnapshot::default());
    }

    #[test]
    fn test_stats_tracking() {
        let stats = TransportStats::new();
        stats.record_sent(10, true);
        stats.record_sent(6, false);
        stats.record_read(42);
        stats.record_message();
        stats.record_ping();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_sent, 1);
        assert_eq!(snapshot.bytes_sent, 16);
        assert_eq!(snapshot.bytes_received, 42);
        assert_eq!(snapshot.messages_received, 1);
        assert_eq!(snapshot.pings_sent, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(TransportStats::new().snapshot()).unwrap();
        assert_eq!(json["messages_sent"], 0);
        assert_eq!(json["bytes_received"], 0);
    }
}
