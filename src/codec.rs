// src/codec.rs
//
// Payload codec for the two bridge directions.
//
// Device -> network: each line must parse as a single JSON object, e.g.
//   {"distance_cm": 42}
// and is re-serialised compactly before it leaves the bridge.
//
// Network -> device: command payloads are opaque to the bridge and are passed
// through untouched apart from trailing line terminators.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::DecodeError;
use crate::io::serial::Line;

// ============================================================================
// Record
// ============================================================================

/// Structured payload decoded from one device line.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Compact JSON text, as published on the bus.
    pub fn to_json(&self) -> String {
        // Serialising a map of JSON values cannot fail.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Record(map)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

// ============================================================================
// Decode / Encode
// ============================================================================

/// Parse a device line into a record.
pub fn decode(line: &Line) -> Result<Record, DecodeError> {
    decode_str(line.as_str())
}

pub fn decode_str(text: &str) -> Result<Record, DecodeError> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(Record(map)),
        other => Err(DecodeError::NotAnObject(json_kind(&other))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Prepare an inbound command for the device.
///
/// The payload is not validated. Trailing CR/LF are stripped so the link's
/// own terminator is the only one the device sees.
pub fn encode_command(payload: &[u8]) -> &[u8] {
    let mut end = payload.len();
    while end > 0 && matches!(payload[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &payload[..end]
}
