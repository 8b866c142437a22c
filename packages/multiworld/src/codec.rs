//! JSON envelope encoding and decoding.
//!
//! The client always sends a JSON array of packet objects. Incoming text may
//! be an array of any length or a single bare object; every element is
//! decoded independently so one bad packet does not hide its neighbours.

use serde_json::Value;
use tracing::trace;

use crate::error::PacketError;
use crate::packet::Packet;

/// Commands the decoder recognises.
const KNOWN_COMMANDS: &[&str] = &[
    "Connect",
    "Sync",
    "LocationChecks",
    "LocationScouts",
    "StatusUpdate",
    "Say",
    "GetDataPackage",
    "RoomInfo",
    "Connected",
    "ConnectionRefused",
    "ReceivedItems",
    "PrintJSON",
    "LocationInfo",
    "RoomUpdate",
];

/// Serialize one packet as a bare JSON object.
pub fn encode_object(packet: &Packet) -> Result<String, PacketError> {
    serde_json::to_string(packet).map_err(PacketError::Encode)
}

/// Serialize one packet wrapped in the array envelope.
pub fn encode(packet: &Packet) -> Result<String, PacketError> {
    encode_batch(std::slice::from_ref(packet))
}

/// Serialize several packets into one array envelope.
pub fn encode_batch(packets: &[Packet]) -> Result<String, PacketError> {
    serde_json::to_string(packets).map_err(PacketError::Encode)
}

/// Parse an envelope. The outer error covers text that is not JSON or is
/// neither an array nor an object; inner results are per packet, in order.
pub fn decode(text: &str) -> Result<Vec<Result<Packet, PacketError>>, PacketError> {
    let value: Value = serde_json::from_str(text).map_err(PacketError::Json)?;
    match value {
        Value::Array(items) => Ok(items.into_iter().map(decode_value).collect()),
        value @ Value::Object(_) => Ok(vec![decode_value(value)]),
        _ => Err(PacketError::BadEnvelope),
    }
}

/// Decode a single packet object.
pub fn decode_value(value: Value) -> Result<Packet, PacketError> {
    let Value::Object(ref object) = value else {
        return Err(PacketError::NotAnObject);
    };
    let cmd = match object.get("cmd") {
        Some(Value::String(cmd)) => cmd.clone(),
        _ => return Err(PacketError::MissingCommand),
    };
    if !KNOWN_COMMANDS.contains(&cmd.as_str()) {
        return Err(PacketError::UnknownCommand(cmd));
    }
    trace!(cmd = %cmd, "decoding packet");
    serde_json::from_value(value).map_err(|source| PacketError::Invalid { cmd, source })
}
