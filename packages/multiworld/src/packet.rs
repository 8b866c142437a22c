//! Typed protocol packets.
//!
//! Every packet is a JSON object discriminated by its `cmd` field. Client
//! packets are built by the session; server packets are decoded by
//! [`crate::codec`]. Fields the server may omit default when absent; the few
//! required ones (Connected `team`/`slot`, ReceivedItems `index`/`items`)
//! make decoding fail when missing or wrong-typed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Ask the server for every item: own world, other worlds and starting inventory.
pub const ITEMS_HANDLING_ALL: i32 = 0b111;

/// Protocol version this client speaks.
pub const PROTOCOL_VERSION: NetworkVersion = NetworkVersion::new(0, 5, 1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkVersion {
    #[serde(default)]
    pub major: i32,
    #[serde(default)]
    pub minor: i32,
    #[serde(default)]
    pub build: i32,
    #[serde(rename = "class", default = "default_version_class")]
    pub class_name: String,
}

impl NetworkVersion {
    pub const fn new(major: i32, minor: i32, build: i32) -> Self {
        Self {
            major,
            minor,
            build,
            class_name: String::new(),
        }
    }

    /// Copy with the class name the server expects.
    pub fn tagged(&self) -> Self {
        Self {
            class_name: default_version_class(),
            ..self.clone()
        }
    }
}

impl Default for NetworkVersion {
    fn default() -> Self {
        Self::new(0, 0, 0).tagged()
    }
}

impl std::fmt::Display for NetworkVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

fn default_version_class() -> String {
    "Version".to_string()
}

/// An item placed at a location, as sent in ReceivedItems and LocationInfo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkItem {
    #[serde(default)]
    pub item: i64,
    #[serde(default)]
    pub location: i64,
    #[serde(default)]
    pub player: i32,
    #[serde(default)]
    pub flags: i32,
}

impl NetworkItem {
    pub const FLAG_ADVANCEMENT: i32 = 0b001;
    pub const FLAG_USEFUL: i32 = 0b010;
    pub const FLAG_TRAP: i32 = 0b100;

    pub fn is_advancement(&self) -> bool {
        self.flags & Self::FLAG_ADVANCEMENT != 0
    }

    pub fn is_useful(&self) -> bool {
        self.flags & Self::FLAG_USEFUL != 0
    }

    pub fn is_trap(&self) -> bool {
        self.flags & Self::FLAG_TRAP != 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPlayer {
    #[serde(default)]
    pub team: i32,
    #[serde(default)]
    pub slot: i32,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub name: String,
}

/// One fragment of a PrintJSON message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonMessagePart {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<i32>,
}

/// Client progress reported through StatusUpdate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ClientStatus {
    #[default]
    Unknown,
    Connected,
    Ready,
    Playing,
    Goal,
}

impl ClientStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Playing => "playing",
            Self::Goal => "goal",
        }
    }
}

impl From<ClientStatus> for i32 {
    fn from(status: ClientStatus) -> Self {
        match status {
            ClientStatus::Unknown => 0,
            ClientStatus::Connected => 5,
            ClientStatus::Ready => 10,
            ClientStatus::Playing => 20,
            ClientStatus::Goal => 30,
        }
    }
}

impl TryFrom<i32> for ClientStatus {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unknown),
            5 => Ok(Self::Connected),
            10 => Ok(Self::Ready),
            20 => Ok(Self::Playing),
            30 => Ok(Self::Goal),
            other => Err(format!("unknown client status {other}")),
        }
    }
}

impl std::str::FromStr for ClientStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unknown" => Ok(Self::Unknown),
            "connected" => Ok(Self::Connected),
            "ready" => Ok(Self::Ready),
            "playing" => Ok(Self::Playing),
            "goal" => Ok(Self::Goal),
            other => Err(format!("unknown client status `{other}`")),
        }
    }
}

/// Server permission level for a command such as `release` or `collect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Disabled,
    Enabled,
    Goal,
    Auto,
    AutoEnabled,
}

impl Permission {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Disabled),
            1 => Some(Self::Enabled),
            2 => Some(Self::Goal),
            6 => Some(Self::Auto),
            7 => Some(Self::AutoEnabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomInfo {
    pub version: NetworkVersion,
    pub generator_version: NetworkVersion,
    pub tags: Vec<String>,
    pub password: bool,
    pub permissions: BTreeMap<String, i32>,
    pub hint_cost: i32,
    pub location_check_points: i32,
    pub games: Vec<String>,
    pub datapackage_checksums: BTreeMap<String, String>,
    pub seed_name: String,
    pub time: f64,
}

impl RoomInfo {
    pub fn permission(&self, command: &str) -> Option<Permission> {
        self.permissions
            .get(command)
            .copied()
            .and_then(Permission::from_i32)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedPacket {
    pub team: i32,
    pub slot: i32,
    #[serde(default)]
    pub players: Vec<NetworkPlayer>,
    #[serde(default)]
    pub missing_locations: Vec<i64>,
    #[serde(default)]
    pub checked_locations: Vec<i64>,
    #[serde(default)]
    pub slot_data: serde_json::Value,
    #[serde(default)]
    pub slot_info: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub hint_points: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedItemsPacket {
    pub index: i32,
    pub items: Vec<NetworkItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrintJsonPacket {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: Vec<JsonMessagePart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiving: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<NetworkItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub found: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countdown: Option<i32>,
}

impl PrintJsonPacket {
    /// Concatenated text of all parts.
    pub fn plain_text(&self) -> String {
        self.data.iter().map(|part| part.text.as_str()).collect()
    }
}

/// Partial room state; only present fields changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomUpdatePacket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub players: Option<Vec<NetworkPlayer>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_locations: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_locations: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint_points: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<BTreeMap<String, i32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Every packet the client sends or understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Packet {
    // === client → server ===
    /// Authenticate as a slot
    Connect {
        password: String,
        game: String,
        name: String,
        uuid: String,
        version: NetworkVersion,
        items_handling: i32,
        tags: Vec<String>,
        slot_data: bool,
    },
    /// Ask the server to resend all received items
    Sync,
    LocationChecks {
        locations: Vec<i64>,
    },
    /// Ask what items sit at the given locations
    LocationScouts {
        locations: Vec<i64>,
        #[serde(default)]
        create_as_hint: i32,
    },
    StatusUpdate {
        status: ClientStatus,
    },
    Say {
        text: String,
    },
    GetDataPackage {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        games: Vec<String>,
    },

    // === server → client ===
    RoomInfo(RoomInfo),
    Connected(ConnectedPacket),
    ConnectionRefused {
        #[serde(default)]
        errors: Vec<String>,
    },
    ReceivedItems(ReceivedItemsPacket),
    #[serde(rename = "PrintJSON")]
    PrintJson(PrintJsonPacket),
    LocationInfo {
        #[serde(default)]
        locations: Vec<NetworkItem>,
    },
    RoomUpdate(RoomUpdatePacket),
}

impl Packet {
    /// Wire value of the `cmd` field.
    pub fn cmd(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "Connect",
            Self::Sync => "Sync",
            Self::LocationChecks { .. } => "LocationChecks",
            Self::LocationScouts { .. } => "LocationScouts",
            Self::StatusUpdate { .. } => "StatusUpdate",
            Self::Say { .. } => "Say",
            Self::GetDataPackage { .. } => "GetDataPackage",
            Self::RoomInfo(_) => "RoomInfo",
            Self::Connected(_) => "Connected",
            Self::ConnectionRefused { .. } => "ConnectionRefused",
            Self::ReceivedItems(_) => "ReceivedItems",
            Self::PrintJson(_) => "PrintJSON",
            Self::LocationInfo { .. } => "LocationInfo",
            Self::RoomUpdate(_) => "RoomUpdate",
        }
    }
}
