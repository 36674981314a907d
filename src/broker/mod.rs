//! Publish/subscribe broker contract.
//!
//! This module contains:
//! - `Broker` trait: the transport both client and server sit on
//! - `ConnectionEvent`: connection lifecycle notifications
//! - Implementations: in-memory (`memory`), call-recording decorator (`recording`)
//!
//! Brokers know nothing about requests or correlation. They move opaque
//! payloads between named channels.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::codec::WirePayload;

#[cfg(feature = "memory")]
pub mod memory;
pub mod recording;

#[cfg(feature = "memory")]
pub use memory::{MemoryBroker, MemoryHub};
pub use recording::RecordingBroker;

/// Capacity of connection event channels.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors that can occur during broker operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker is not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish to '{channel}' failed: {message}")]
    Publish { channel: String, message: String },

    #[error("Subscribe to '{channel}' failed: {message}")]
    Subscribe { channel: String, message: String },
}

/// Connection lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Connection established (or re-established).
    Connected,
    /// Transport failure; the connection is unusable until reconnected.
    Error(String),
    /// Connection closed.
    Disconnected,
}

/// Callback invoked for each payload delivered on a subscribed channel.
///
/// Called from within the async runtime, in per-channel publish order.
pub type MessageHandler = Arc<dyn Fn(WirePayload) + Send + Sync>;

/// Confirmation of an active subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Channel the subscription is attached to.
    pub channel: String,
}

/// Interface to a publish/subscribe transport.
///
/// Implementations:
/// - `MemoryBroker`: in-process hub, for tests and embedding
/// - `RecordingBroker`: wraps another broker and records calls
#[async_trait]
pub trait Broker: Send + Sync {
    /// Establish the connection.
    async fn connect(&self) -> Result<()>;

    /// Release the connection and its subscriptions.
    async fn disconnect(&self) -> Result<()>;

    /// Publish a payload. Resolves once the broker accepted it.
    async fn publish(&self, channel: &str, payload: WirePayload) -> Result<()>;

    /// Subscribe a handler to a channel.
    ///
    /// Resolves once the subscription is active: payloads published after
    /// this returns are delivered to `handler`.
    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<Subscription>;

    /// Drop this connection's subscriptions to a channel.
    fn unsubscribe(&self, channel: &str);

    /// Receiver for connection lifecycle events.
    fn events(&self) -> broadcast::Receiver<ConnectionEvent>;
}

#[async_trait]
impl<B: Broker + ?Sized> Broker for Arc<B> {
    async fn connect(&self) -> Result<()> {
        (**self).connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        (**self).disconnect().await
    }

    async fn publish(&self, channel: &str, payload: WirePayload) -> Result<()> {
        (**self).publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<Subscription> {
        (**self).subscribe(channel, handler).await
    }

    fn unsubscribe(&self, channel: &str) {
        (**self).unsubscribe(channel)
    }

    fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        (**self).events()
    }
}
