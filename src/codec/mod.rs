//! Encoding strategies.
//!
//! A codec converts a [`Packet`] to and from the value the broker transports.
//! - `IdentityCodec`: structural pass-through, for brokers that carry structured values
//! - `JsonCodec`: JSON text, for brokers that only carry strings
//!
//! `JsonCodec` also accepts payloads that arrive already decoded, since some
//! brokers decode JSON on the transport's behalf.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::packet::Packet;

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors that can occur while encoding or decoding packets.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Codec '{codec}' cannot decode a {form} payload")]
    UnexpectedForm { codec: &'static str, form: &'static str },
}

/// Value carried by the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum WirePayload {
    /// Structured value, passed through by the broker as-is.
    Structured(Value),
    /// Textual value.
    Text(String),
}

impl WirePayload {
    /// Short name of the payload form, for logs and errors.
    pub fn form(&self) -> &'static str {
        match self {
            WirePayload::Structured(_) => "structured",
            WirePayload::Text(_) => "text",
        }
    }
}

impl fmt::Display for WirePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WirePayload::Structured(value) => write!(f, "{value}"),
            WirePayload::Text(text) => f.write_str(text),
        }
    }
}

/// Serializer/deserializer pair applied to every packet.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Codec name, for logging.
    fn name(&self) -> &'static str;

    /// Encode a packet for publishing.
    fn serialize(&self, packet: &Packet) -> Result<WirePayload>;

    /// Decode a received payload.
    fn deserialize(&self, payload: WirePayload) -> Result<Packet>;
}

/// Structural pass-through codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn serialize(&self, packet: &Packet) -> Result<WirePayload> {
        Ok(WirePayload::Structured(serde_json::to_value(packet)?))
    }

    fn deserialize(&self, payload: WirePayload) -> Result<Packet> {
        match payload {
            WirePayload::Structured(value) => Ok(serde_json::from_value(value)?),
            other => Err(CodecError::UnexpectedForm {
                codec: self.name(),
                form: other.form(),
            }),
        }
    }
}

/// JSON text codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, packet: &Packet) -> Result<WirePayload> {
        Ok(WirePayload::Text(serde_json::to_string(packet)?))
    }

    fn deserialize(&self, payload: WirePayload) -> Result<Packet> {
        match payload {
            WirePayload::Text(text) => Ok(serde_json::from_str(&text)?),
            // Already decoded by the transport
            WirePayload::Structured(value) => Ok(serde_json::from_value(value)?),
        }
    }
}

/// Codec selector used by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// Structural pass-through.
    #[default]
    Identity,
    /// JSON text.
    Json,
}

impl CodecKind {
    /// Build the codec this kind names.
    pub fn build(&self) -> Arc<dyn Codec> {
        match self {
            CodecKind::Identity => Arc::new(IdentityCodec),
            CodecKind::Json => Arc::new(JsonCodec),
        }
    }
}
