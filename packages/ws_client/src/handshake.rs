//! HTTP/1.1 Upgrade handshake (RFC 6455 §4).

use std::time::{Duration, Instant};

use data_encoding::BASE64;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::error::WsError;
use crate::socket::{Recv, Socket};
use crate::timer::CancelToken;
use crate::url;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the size of the server's response head.
pub const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// Fresh `Sec-WebSocket-Key`: base64 of 16 random bytes.
pub fn generate_key() -> String {
    BASE64.encode(&rand::random::<[u8; 16]>())
}

/// `base64(SHA1(key + GUID))`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(&hasher.finalize())
}

pub fn build_request(host: &str, port: u16, path: &str, key: &str) -> String {
    let authority = url::authority(host, port);
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {authority}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    )
}

/// Index just past the `\r\n\r\n` head terminator.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Start line and headers of an HTTP message head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHead {
    pub start_line: String,
    pub headers: Vec<(String, String)>,
}

impl HttpHead {
    pub fn parse(head: &[u8]) -> Result<Self, WsError> {
        let text = std::str::from_utf8(head)
            .map_err(|_| WsError::Handshake("response head is not valid UTF-8".into()))?;
        let mut lines = text.split("\r\n").filter(|line| !line.is_empty());
        let start_line = lines
            .next()
            .ok_or_else(|| WsError::Handshake("empty response".into()))?
            .to_string();

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| WsError::Handshake(format!("malformed header line `{line}`")))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
        Ok(Self {
            start_line,
            headers,
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Status code from an `HTTP/1.1 <code> <reason>` start line.
    pub fn status(&self) -> Option<u16> {
        let mut parts = self.start_line.split_whitespace();
        let version = parts.next()?;
        if !version.starts_with("HTTP/") {
            return None;
        }
        parts.next()?.parse().ok()
    }
}

/// Check status, `Upgrade` and `Sec-WebSocket-Accept` against the key we sent.
pub fn validate_response(head: &HttpHead, key: &str) -> Result<(), WsError> {
    match head.status() {
        Some(101) => {}
        _ => {
            return Err(WsError::Handshake(format!(
                "expected 101 Switching Protocols, got `{}`",
                head.start_line
            )));
        }
    }

    let upgrade = head.header("Upgrade").unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(WsError::Handshake(format!(
            "missing or wrong Upgrade header `{upgrade}`"
        )));
    }

    let expected = accept_key(key);
    let actual = head.header("Sec-WebSocket-Accept").unwrap_or_default();
    if actual != expected {
        return Err(WsError::AcceptMismatch {
            expected,
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Run the client side of the handshake on a freshly connected socket.
///
/// Returns any bytes that arrived after the response head; they belong to
/// the first frames. The socket's read timeout sets how often `cancel` and
/// the deadline are checked.
pub fn perform(
    socket: &mut Socket,
    host: &str,
    port: u16,
    path: &str,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<Vec<u8>, WsError> {
    let key = generate_key();
    socket
        .send_all(build_request(host, port, path, &key).as_bytes())
        .map_err(|e| WsError::Handshake(format!("failed to send upgrade request: {e}")))?;

    let deadline = Instant::now() + timeout;
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        if buf.len() > MAX_RESPONSE_HEAD {
            return Err(WsError::Handshake("response head too large".into()));
        }
        if Instant::now() >= deadline {
            return Err(WsError::Handshake("timed out waiting for response".into()));
        }
        if cancel.is_cancelled() {
            return Err(WsError::Handshake("cancelled".into()));
        }
        let received = socket
            .recv(&mut chunk)
            .map_err(|e| WsError::Handshake(format!("failed to read response: {e}")))?;
        match received {
            Recv::Data(n) => buf.extend_from_slice(&chunk[..n]),
            Recv::Timeout => continue,
            Recv::Closed => {
                return Err(WsError::Handshake(
                    "connection closed during handshake".into(),
                ));
            }
        }
    };

    let head = HttpHead::parse(&buf[..head_end])?;
    validate_response(&head, &key)?;
    debug!(peer = %socket.peer_addr(), "websocket handshake complete");
    Ok(buf.split_off(head_end))
}

/// Server-side `101` response for a client's key.
pub fn server_response(client_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(client_key)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc_example() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZK+xOo4k="
        );
    }

    #[test]
    fn generated_key_is_16_bytes_base64() {
        let key = generate_key();
        assert_eq!(BASE64.decode(key.as_bytes()).unwrap().len(), 16);
        assert_ne!(key, generate_key());
    }

    #[test]
    fn request_layout() {
        let req = build_request("localhost", 38281, "/", "abc==");
        assert!(req.starts_with("GET / HTTP/1.1\r\nHost: localhost:38281\r\n"));
        assert!(req.contains("Upgrade: websocket\r\n"));
        assert!(req.contains("Connection: Upgrade\r\n"));
        assert!(req.contains("Sec-WebSocket-Key: abc==\r\n"));
        assert!(req.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(req.ends_with("\r\n\r\n"));
    }

    #[test]
    fn request_brackets_ipv6_host() {
        let req = build_request("::1", 9000, "/ws", "abc==");
        assert!(req.starts_with("GET /ws HTTP/1.1\r\nHost: [::1]:9000\r\n"));
    }

    #[test]
    fn validates_good_response_case_insensitively() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let raw = "HTTP/1.1 101 Switching Protocols\r\n\
                   upgrade: WebSocket\r\n\
                   connection: upgrade\r\n\
                   sec-websocket-accept: s3pPLMBiTxaQ9kYGzzhZK+xOo4k=\r\n\r\n";
        let head = HttpHead::parse(raw.as_bytes()).unwrap();
        validate_response(&head, key).unwrap();
    }

    #[test]
    fn rejects_wrong_status_upgrade_and_accept() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";

        let head = HttpHead::parse(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
        assert!(matches!(
            validate_response(&head, key),
            Err(WsError::Handshake(_))
        ));

        let head = HttpHead::parse(
            b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: h2c\r\n\r\n",
        )
        .unwrap();
        assert!(matches!(
            validate_response(&head, key),
            Err(WsError::Handshake(_))
        ));

        let head = HttpHead::parse(
            b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: nope\r\n\r\n",
        )
        .unwrap();
        assert!(matches!(
            validate_response(&head, key),
            Err(WsError::AcceptMismatch { .. })
        ));
    }

    #[test]
    fn head_end_detection() {
        assert_eq!(find_head_end(b"HTTP/1.1 101\r\n\r\nrest"), Some(16));
        assert_eq!(find_head_end(b"HTTP/1.1 101\r\n"), None);
    }

    #[test]
    fn server_response_validates() {
        let key = generate_key();
        let raw = server_response(&key);
        let head = HttpHead::parse(raw.as_bytes()).unwrap();
        validate_response(&head, &key).unwrap();
    }
}
