//! Wire packet.
//!
//! One envelope type travels over every channel. Request and event packets
//! carry `pattern` and `data`; response packets carry `err`, `response`,
//! `isDisposed`. The `id` links a request to all of its responses and is
//! absent on events.
//!
//! Wire shapes:
//! - request: `{ pattern, data, id }`
//! - event: `{ pattern, data }`
//! - response: `{ err, response, isDisposed, id }` (`err` is `null` on success)

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::channel::Pattern;

/// Mint a fresh correlation id.
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// The unit exchanged on the wire.
///
/// Built immediately before publish and not mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Packet {
    /// Logical operation; absent on response packets.
    pub pattern: Option<String>,
    /// Request or event payload.
    #[serde(deserialize_with = "present")]
    pub data: Option<Value>,
    /// Correlation id; absent on events.
    pub id: Option<String>,
    /// Error payload; terminates the request when present.
    pub err: Option<Value>,
    /// Response payload. A `null` on the wire is a value; only an absent
    /// field means "no value".
    #[serde(deserialize_with = "present")]
    pub response: Option<Value>,
    /// Final packet for this correlation id.
    pub is_disposed: bool,
}

// Only called when the field is present; absent fields fall back to `None`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl Packet {
    /// Correlated request packet.
    pub fn request(pattern: &Pattern, data: Value, id: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.as_str().to_string()),
            data: Some(data),
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Fire-and-forget event packet; no id, no reply expected.
    pub fn event(pattern: &Pattern, data: Value) -> Self {
        Self {
            pattern: Some(pattern.as_str().to_string()),
            data: Some(data),
            ..Default::default()
        }
    }

    /// Response packet carrying an optional value.
    ///
    /// `disposed` marks the packet as the last one for `id`.
    pub fn reply(id: impl Into<String>, response: Option<Value>, disposed: bool) -> Self {
        Self {
            id: Some(id.into()),
            response,
            is_disposed: disposed,
            ..Default::default()
        }
    }

    /// Terminal error response.
    pub fn failure(id: impl Into<String>, err: Value) -> Self {
        Self {
            id: Some(id.into()),
            err: Some(err),
            is_disposed: true,
            ..Default::default()
        }
    }

    /// Response packets are the ones without a pattern.
    pub fn is_response(&self) -> bool {
        self.pattern.is_none()
    }

    /// True when this packet ends the response sequence for its id.
    pub fn is_terminal(&self) -> bool {
        self.is_disposed || self.err.is_some()
    }

    /// Request payload, `null` when absent.
    pub fn data_or_null(&self) -> Value {
        self.data.clone().unwrap_or(Value::Null)
    }
}

impl Serialize for Packet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match &self.pattern {
            Some(pattern) => {
                map.serialize_entry("pattern", pattern)?;
                if let Some(data) = &self.data {
                    map.serialize_entry("data", data)?;
                }
                if let Some(id) = &self.id {
                    map.serialize_entry("id", id)?;
                }
            }
            None => {
                map.serialize_entry("err", &self.err)?;
                if let Some(response) = &self.response {
                    map.serialize_entry("response", response)?;
                }
                map.serialize_entry("isDisposed", &self.is_disposed)?;
                if let Some(id) = &self.id {
                    map.serialize_entry("id", id)?;
                }
            }
        }
        map.end()
    }
}
