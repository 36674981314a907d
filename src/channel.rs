//! Channel naming.
//!
//! A logical pattern maps onto physical broker channels:
//! - request/response patterns use `<pattern>_ack` (requests) and `<pattern>_res` (responses)
//! - event patterns use the bare pattern name
//!
//! The suffixes are part of the wire contract and must match peers exactly.

use std::fmt;

use serde_json::Value;

/// Suffix of the channel requests are published on.
pub const ACK_SUFFIX: &str = "_ack";
/// Suffix of the channel responses are published on.
pub const RES_SUFFIX: &str = "_res";

/// Result type for pattern construction.
pub type Result<T> = std::result::Result<T, PatternError>;

/// Errors that can occur when building a pattern.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("Pattern must not be empty")]
    Empty,
}

/// Logical operation name, the basis for all channel names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pattern(String);

impl Pattern {
    /// Create a pattern from a string name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Self(name))
    }

    /// Create a pattern from a structured value.
    ///
    /// Strings are used verbatim. Anything else is rendered as compact JSON;
    /// `serde_json` maps keep keys sorted, so equal objects give equal patterns.
    pub fn normalize(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Self::new(s.clone()),
            other => Self::new(other.to_string()),
        }
    }

    /// The pattern name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Channel requests for this pattern are published on.
    pub fn ack_channel(&self) -> String {
        format!("{}{}", self.0, ACK_SUFFIX)
    }

    /// Channel responses for this pattern are published on.
    pub fn res_channel(&self) -> String {
        format!("{}{}", self.0, RES_SUFFIX)
    }

    /// Channel fire-and-forget events for this pattern are published on.
    pub fn event_channel(&self) -> String {
        self.0.clone()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Pattern {
    type Error = PatternError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for Pattern {
    type Error = PatternError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

/// Conversion into a validated [`Pattern`].
///
/// Implemented for names and for patterns themselves so call sites can pass either.
pub trait IntoPattern {
    fn into_pattern(self) -> Result<Pattern>;
}

impl IntoPattern for Pattern {
    fn into_pattern(self) -> Result<Pattern> {
        Ok(self)
    }
}

impl IntoPattern for &Pattern {
    fn into_pattern(self) -> Result<Pattern> {
        Ok(self.clone())
    }
}

impl IntoPattern for &str {
    fn into_pattern(self) -> Result<Pattern> {
        Pattern::new(self)
    }
}

impl IntoPattern for String {
    fn into_pattern(self) -> Result<Pattern> {
        Pattern::new(self)
    }
}

impl IntoPattern for &String {
    fn into_pattern(self) -> Result<Pattern> {
        Pattern::new(self.as_str())
    }
}

/// Which physical channel family a pattern is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Request/response: listens on the ack channel, replies on the res channel.
    Request,
    /// Fire-and-forget: listens on the bare pattern channel.
    Event,
}

impl ChannelKind {
    /// Channel a responder subscribes to for this kind of pattern.
    pub fn inbound_channel(&self, pattern: &Pattern) -> String {
        match self {
            ChannelKind::Request => pattern.ack_channel(),
            ChannelKind::Event => pattern.event_channel(),
        }
    }
}
