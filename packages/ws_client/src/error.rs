//! Error types for the WebSocket client.

use std::io;

use crate::frame::FrameError;

/// Errors that can occur while connecting, handshaking, or exchanging frames.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported URL scheme `{0}` (only ws:// is supported)")]
    UnsupportedScheme(String),

    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("Sec-WebSocket-Accept mismatch: expected {expected}, got {actual}")]
    AcceptMismatch { expected: String, actual: String },

    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("background thread panicked: {0}")]
    Panicked(String),
}

impl WsError {
    /// Stable machine-readable code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "invalid_url",
            Self::UnsupportedScheme(_) => "unsupported_scheme",
            Self::Resolve { .. } => "resolve_failed",
            Self::Connect { .. } => "connect_failed",
            Self::Handshake(_) => "handshake_failed",
            Self::AcceptMismatch { .. } => "accept_mismatch",
            Self::Protocol(_) => "protocol_error",
            Self::ConnectionLost(_) => "connection_lost",
            Self::Io(_) => "io_error",
            Self::Panicked(_) => "panicked",
        }
    }

    /// True for failures that happen before the connection is established
    /// (DNS, TCP, or the HTTP upgrade).
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl(_)
                | Self::UnsupportedScheme(_)
                | Self::Resolve { .. }
                | Self::Connect { .. }
                | Self::Handshake(_)
                | Self::AcceptMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(
            WsError::UnsupportedScheme("wss".into()).error_code(),
            "unsupported_scheme"
        );
        assert_eq!(
            WsError::Protocol(FrameError::ReservedBits(0x40)).error_code(),
            "protocol_error"
        );
    }

    #[test]
    fn connect_failures_are_classified() {
        assert!(WsError::Handshake("no 101".into()).is_connect_failure());
        assert!(
            WsError::AcceptMismatch {
                expected: "a".into(),
                actual: "b".into()
            }
            .is_connect_failure()
        );
        assert!(!WsError::ConnectionLost("eof".into()).is_connect_failure());
        assert!(!WsError::Protocol(FrameError::FragmentedControl).is_connect_failure());
    }
}
