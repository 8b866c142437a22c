//! Error kinds and error types for the session layer.

use serde::{Deserialize, Serialize};
use ws_client::WsError;

/// Coarse classification surfaced to the application with every error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// DNS, TCP, or WebSocket handshake failure.
    ConnectionFailed,
    /// The server answered Connect with ConnectionRefused.
    AuthenticationFailed,
    /// JSON parse failure or a required field missing / wrong-typed.
    InvalidPacket,
    /// Socket failure after the connection was established.
    NetworkError,
    /// Well-formed JSON carrying an unrecognized or structurally invalid command.
    ProtocolError,
}

impl ErrorKind {
    /// Failures before the WebSocket upgrade completed are connection
    /// failures; anything later is a network error.
    pub fn of_transport(error: &WsError) -> Self {
        if error.is_connect_failure() {
            Self::ConnectionFailed
        } else {
            Self::NetworkError
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionFailed => "connection_failed",
            Self::AuthenticationFailed => "authentication_failed",
            Self::InvalidPacket => "invalid_packet",
            Self::NetworkError => "network_error",
            Self::ProtocolError => "protocol_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures while encoding or decoding packets.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("malformed JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("envelope must be a JSON array or object")]
    BadEnvelope,

    #[error("packet is not a JSON object")]
    NotAnObject,

    #[error("packet has no string `cmd` field")]
    MissingCommand,

    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    #[error("invalid `{cmd}` packet: {source}")]
    Invalid {
        cmd: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid `{cmd}` packet: {reason}")]
    OutOfRange { cmd: &'static str, reason: String },

    #[error("failed to encode packet: {0}")]
    Encode(#[source] serde_json::Error),
}

impl PacketError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownCommand(_) | Self::NotAnObject => ErrorKind::ProtocolError,
            _ => ErrorKind::InvalidPacket,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Json(_) => "malformed_json",
            Self::BadEnvelope => "bad_envelope",
            Self::NotAnObject => "not_an_object",
            Self::MissingCommand => "missing_command",
            Self::UnknownCommand(_) => "unknown_command",
            Self::Invalid { .. } => "invalid_packet",
            Self::OutOfRange { .. } => "out_of_range",
            Self::Encode(_) => "encode_failed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{message}")]
    ConnectionFailed {
        transport_code: &'static str,
        message: String,
    },

    #[error("Connection refused: {}", .errors.join(", "))]
    ConnectionRefused { errors: Vec<String> },

    #[error("{message}")]
    Network {
        transport_code: &'static str,
        message: String,
    },

    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error("invalid server address: {0}")]
    InvalidAddress(#[source] WsError),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionFailed { .. } | Self::InvalidAddress(_) => ErrorKind::ConnectionFailed,
            Self::ConnectionRefused { .. } => ErrorKind::AuthenticationFailed,
            Self::Network { .. } => ErrorKind::NetworkError,
            Self::Packet(e) => e.kind(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::ConnectionRefused { .. } => "connection_refused",
            Self::Network { .. } => "network_error",
            Self::Packet(e) => e.error_code(),
            Self::InvalidAddress(_) => "invalid_address",
        }
    }

    /// Classify a transport error by whether a session had been established.
    pub fn from_transport(error: &WsError) -> Self {
        let transport_code = error.error_code();
        let message = error.to_string();
        match ErrorKind::of_transport(error) {
            ErrorKind::ConnectionFailed => Self::ConnectionFailed {
                transport_code,
                message,
            },
            _ => Self::Network {
                transport_code,
                message,
            },
        }
    }

    /// Code of the underlying transport error, if this came from one.
    pub fn transport_code(&self) -> Option<&'static str> {
        match self {
            Self::ConnectionFailed { transport_code, .. } | Self::Network { transport_code, .. } => {
                Some(transport_code)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_message_lists_reasons() {
        let err = SessionError::ConnectionRefused {
            errors: vec!["InvalidSlot".into(), "InvalidPassword".into()],
        };
        assert_eq!(
            err.to_string(),
            "Connection refused: InvalidSlot, InvalidPassword"
        );
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
        assert_eq!(err.error_code(), "connection_refused");
    }

    #[test]
    fn transport_errors_are_classified() {
        let err = SessionError::from_transport(&WsError::Handshake("no 101".into()));
        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        assert_eq!(err.to_string(), "handshake failed: no 101");
        assert_eq!(err.transport_code(), Some("handshake_failed"));

        let err = SessionError::from_transport(&WsError::ConnectionLost("eof".into()));
        assert_eq!(err.kind(), ErrorKind::NetworkError);
        assert_eq!(err.error_code(), "network_error");
        assert_eq!(err.transport_code(), Some("connection_lost"));
    }

    #[test]
    fn packet_error_kinds() {
        assert_eq!(
            PacketError::UnknownCommand("Bounce".into()).kind(),
            ErrorKind::ProtocolError
        );
        assert_eq!(PacketError::MissingCommand.kind(), ErrorKind::InvalidPacket);
        assert_eq!(
            serde_json::to_value(ErrorKind::NetworkError).unwrap(),
            "network_error"
        );
    }
}
