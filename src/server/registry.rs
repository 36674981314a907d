//! Pattern to handler bindings.
//!
//! Each pattern binds exactly one handler, and each physical inbound channel
//! belongs to exactly one pattern. Both are checked when a handler is added,
//! so dispatch never has to guess.

use std::collections::BTreeMap;

use super::handler::Handler;
use super::{Result, ServerError};
use crate::channel::Pattern;

/// A registered handler and the channel it listens on.
#[derive(Debug, Clone)]
pub(crate) struct Binding {
    pub(crate) pattern: Pattern,
    pub(crate) channel: String,
    pub(crate) handler: Handler,
}

#[derive(Debug, Default)]
pub(crate) struct HandlerRegistry {
    bindings: BTreeMap<Pattern, Binding>,
}

impl HandlerRegistry {
    pub(crate) fn insert(&mut self, pattern: Pattern, handler: Handler) -> Result<()> {
        if self.bindings.contains_key(&pattern) {
            return Err(ServerError::DuplicatePattern(pattern.to_string()));
        }

        let channel = handler.kind().inbound_channel(&pattern);
        if let Some(existing) = self.bindings.values().find(|b| b.channel == channel) {
            // e.g. an event named "/x_ack" next to a request named "/x"
            return Err(ServerError::ChannelConflict {
                pattern: pattern.to_string(),
                channel,
                existing: existing.pattern.to_string(),
            });
        }

        self.bindings.insert(
            pattern.clone(),
            Binding {
                pattern,
                channel,
                handler,
            },
        );
        Ok(())
    }

    pub(crate) fn patterns(&self) -> Vec<Pattern> {
        self.bindings.keys().cloned().collect()
    }

    pub(crate) fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.values()
    }
}
