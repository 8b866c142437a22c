use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use ws_client::TransportConfig;

use crate::packet::{ITEMS_HANDLING_ALL, NetworkVersion, PROTOCOL_VERSION};

// =============================================================================
// Unified config (figment-deserialized from defaults / mwclient.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   mwclient.toml:   [session]
//                    auto_reconnect = false
//
//   env var:         MW_SESSION__AUTO_RECONNECT=false   (double underscore = nesting)
//
//   (single underscore stays within field names: MW_TRANSPORT__CONNECT_TIMEOUT_MS)

pub const DEFAULT_CONFIG_FILE: &str = "mwclient.toml";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
    #[serde(default)]
    pub transport: TransportFileConfig,
}

/// Where to connect and as whom (`[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub slot_name: String,
    #[serde(default)]
    pub password: String,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            slot_name: String::new(),
            password: String::new(),
        }
    }
}

/// Session protocol tunables (`[session]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    #[serde(default = "default_game")]
    pub game: String,
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Fixed session identifier; a random UUID is generated when unset.
    #[serde(default)]
    pub session_id: Option<String>,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            game: default_game(),
            tags: default_tags(),
            auto_reconnect: default_auto_reconnect(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            session_id: None,
        }
    }
}

/// WebSocket transport tunables (`[transport]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportFileConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// 0 disables keep-alive pings.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for TransportFileConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            ping_interval_secs: default_ping_interval_secs(),
            max_message_size: default_max_message_size(),
        }
    }
}

fn default_address() -> String {
    "archipelago.gg".to_string()
}
fn default_port() -> u16 {
    38281
}
fn default_game() -> String {
    "Selaco".to_string()
}
fn default_tags() -> Vec<String> {
    vec!["AP".to_string()]
}
fn default_auto_reconnect() -> bool {
    true
}
fn default_reconnect_delay_ms() -> u64 {
    3_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_poll_interval_ms() -> u64 {
    10
}
fn default_ping_interval_secs() -> u64 {
    30
}
fn default_max_message_size() -> usize {
    16 * 1024 * 1024
}

/// Build a figment that layers: defaults → TOML file → MW_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `MW_SERVER__PORT=38282`  →  `server.port = 38282`
///   `MW_SESSION__RECONNECT_DELAY_MS=500`  →  `session.reconnect_delay_ms = 500`
pub fn load_config(path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MW_").split("__"))
}

/// Connection target and credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    pub slot_name: String,
    pub password: String,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Self {
        Self {
            address: fc.address.clone(),
            port: fc.port,
            slot_name: fc.slot_name.clone(),
            password: fc.password.clone(),
        }
    }
}

/// Runtime session settings.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub game: String,
    pub tags: Vec<String>,
    pub items_handling: i32,
    pub version: NetworkVersion,
    pub auto_reconnect: bool,
    pub reconnect_delay: Duration,
    pub session_id: Option<String>,
    pub transport: TransportConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}

impl SessionConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            game: fc.session.game.clone(),
            tags: fc.session.tags.clone(),
            items_handling: ITEMS_HANDLING_ALL,
            version: PROTOCOL_VERSION.tagged(),
            auto_reconnect: fc.session.auto_reconnect,
            reconnect_delay: Duration::from_millis(fc.session.reconnect_delay_ms),
            session_id: fc.session.session_id.clone().filter(|id| !id.is_empty()),
            transport: transport_config_from_file(&fc.transport),
        }
    }
}

pub fn transport_config_from_file(fc: &TransportFileConfig) -> TransportConfig {
    TransportConfig {
        connect_timeout: Duration::from_millis(fc.connect_timeout_ms),
        poll_interval: Duration::from_millis(fc.poll_interval_ms.max(1)),
        ping_interval: (fc.ping_interval_secs > 0)
            .then(|| Duration::from_secs(fc.ping_interval_secs)),
        max_message_size: fc.max_message_size,
        ..TransportConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_config_defaults() {
        let fc = FileConfig::default();
        assert_eq!(fc.server.address, "archipelago.gg");
        assert_eq!(fc.server.port, 38281);
        assert_eq!(fc.session.tags, vec!["AP".to_string()]);
        assert!(fc.session.auto_reconnect);
        assert_eq!(fc.transport.ping_interval_secs, 30);
    }

    #[test]
    fn test_session_config_from_file() {
        let mut fc = FileConfig::default();
        fc.session.reconnect_delay_ms = 250;
        fc.session.session_id = Some(String::new());
        fc.transport.ping_interval_secs = 0;

        let config = SessionConfig::from_file(&fc);
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.items_handling, 0b111);
        assert_eq!(config.version.class_name, "Version");
        assert!(config.session_id.is_none());
        assert!(config.transport.ping_interval.is_none());
        assert!(!config.transport.auto_reconnect);
    }

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(&tmp.path().join(DEFAULT_CONFIG_FILE))
            .extract()
            .unwrap();
        assert_eq!(fc.server.port, 38281);
        assert_eq!(fc.session.game, "Selaco");
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(
            &path,
            "[server]\naddress = \"localhost\"\nport = 38282\nslot_name = \"Dawn\"\n\n\
             [session]\nauto_reconnect = false\nreconnect_delay_ms = 500\n\n\
             [transport]\nconnect_timeout_ms = 2000\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(&path).extract().unwrap();
        assert_eq!(fc.server.address, "localhost");
        assert_eq!(fc.server.port, 38282);
        assert_eq!(fc.server.slot_name, "Dawn");
        assert!(!fc.session.auto_reconnect);
        assert_eq!(fc.session.reconnect_delay_ms, 500);
        assert_eq!(fc.transport.connect_timeout_ms, 2000);
        // Untouched fields keep their defaults
        assert_eq!(fc.transport.poll_interval_ms, 10);
    }

    #[test]
    fn test_server_config_from_file() {
        let fc = ServerFileConfig {
            slot_name: "Dawn".into(),
            ..Default::default()
        };
        let config = ServerConfig::from_file(&fc);
        assert_eq!(config.slot_name, "Dawn");
        assert_eq!(config.port, 38281);
    }
}
