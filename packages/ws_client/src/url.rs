//! `ws://host[:port]/path` parsing.

use crate::error::WsError;

pub const DEFAULT_WS_PORT: u16 = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl WsUrl {
    /// Parse a WebSocket URL. Only plain `ws://` is accepted; any other
    /// scheme, `wss://` included, is an `UnsupportedScheme` error.
    pub fn parse(url: &str) -> Result<Self, WsError> {
        Self::parse_with_port(url, DEFAULT_WS_PORT)
    }

    /// Like [`WsUrl::parse`], using `default_port` when the URL names none.
    pub fn parse_with_port(url: &str, default_port: u16) -> Result<Self, WsError> {
        let url = url.trim();
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| WsError::InvalidUrl(format!("missing scheme in `{url}`")))?;

        if !scheme.eq_ignore_ascii_case("ws") {
            return Err(WsError::UnsupportedScheme(scheme.to_string()));
        }

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        let (host, port) = split_host_port(authority, default_port)?;

        Ok(Self {
            host,
            port,
            path: path.to_string(),
        })
    }

    /// `host:port` as sent in the `Host` header.
    pub fn authority(&self) -> String {
        authority(&self.host, self.port)
    }
}

/// `host:port`, with IPv6 literals bracketed.
pub fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

impl std::fmt::Display for WsUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ws://{}{}", self.authority(), self.path)
    }
}

/// Split `host[:port]`, accepting bracketed IPv6 literals.
pub fn split_host_port(authority: &str, default_port: u16) -> Result<(String, u16), WsError> {
    let invalid = || WsError::InvalidUrl(format!("invalid host `{authority}`"));

    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
        match after {
            "" => (host, None),
            _ => (host, Some(after.strip_prefix(':').ok_or_else(invalid)?)),
        }
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| WsError::InvalidUrl(format!("invalid port `{port}`")))?,
        None => default_port,
    };
    Ok((host.to_string(), port))
}
