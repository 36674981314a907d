//! In-memory broker for standalone mode.
//!
//! A `MemoryHub` routes payloads between any number of `MemoryBroker`
//! connections within a single process. Each subscription gets its own
//! delivery task fed by an unbounded channel, so payloads on one channel
//! reach a subscriber in publish order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::{
    Broker, BrokerError, ConnectionEvent, MessageHandler, Result, Subscription,
    EVENT_CHANNEL_CAPACITY,
};
use crate::codec::WirePayload;

/// One connection's interest in a channel.
struct Subscriber {
    connection: u64,
    online: Arc<AtomicBool>,
    sender: mpsc::UnboundedSender<WirePayload>,
}

#[derive(Default)]
struct HubState {
    next_connection: AtomicU64,
    channels: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl HubState {
    fn channels(&self) -> MutexGuard<'_, HashMap<String, Vec<Subscriber>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, connection: u64, channel: Option<&str>) {
        let mut channels = self.channels();
        channels.retain(|name, subscribers| {
            if channel.map_or(true, |c| c == name) {
                subscribers.retain(|s| s.connection != connection);
            }
            !subscribers.is_empty()
        });
    }
}

/// Shared in-process routing hub.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<HubState>,
}

impl MemoryHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new (not yet connected) broker connection on this hub.
    pub fn connection(&self) -> MemoryBroker {
        let id = self.state.next_connection.fetch_add(1, Ordering::SeqCst);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        MemoryBroker {
            id,
            hub: self.state.clone(),
            online: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    /// Number of subscriptions, across all connections, on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state.channels().get(channel).map_or(0, Vec::len)
    }
}

/// A single connection to a `MemoryHub`.
pub struct MemoryBroker {
    id: u64,
    hub: Arc<HubState>,
    online: Arc<AtomicBool>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl MemoryBroker {
    /// Whether the connection is currently usable.
    pub fn is_connected(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Simulate a transport failure.
    ///
    /// The connection goes offline and emits `ConnectionEvent::Error`.
    /// Subscriptions are kept and resume delivery after `connect()`.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.online.store(false, Ordering::SeqCst);
        warn!(connection = self.id, reason = %reason, "Memory broker connection failed");
        let _ = self.events.send(ConnectionEvent::Error(reason));
    }

    fn ensure_online(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<()> {
        if !self.online.swap(true, Ordering::SeqCst) {
            info!(connection = self.id, "Memory broker connected");
            let _ = self.events.send(ConnectionEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.hub.remove(self.id, None);
        if self.online.swap(false, Ordering::SeqCst) {
            info!(connection = self.id, "Memory broker disconnected");
            let _ = self.events.send(ConnectionEvent::Disconnected);
        }
        Ok(())
    }

    #[tracing::instrument(name = "broker.publish", skip_all, fields(channel = %channel))]
    async fn publish(&self, channel: &str, payload: WirePayload) -> Result<()> {
        self.ensure_online()?;

        let mut delivered = 0usize;
        if let Some(subscribers) = self.hub.channels().get(channel) {
            for subscriber in subscribers {
                if !subscriber.online.load(Ordering::SeqCst) {
                    continue;
                }
                // Closed receivers are cleaned up on unsubscribe
                if subscriber.sender.send(payload.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }

        debug!(receivers = delivered, "Published payload");
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<Subscription> {
        self.ensure_online()?;

        let (sender, mut receiver) = mpsc::unbounded_channel::<WirePayload>();
        tokio::spawn(async move {
            while let Some(payload) = receiver.recv().await {
                handler(payload);
            }
        });

        self.hub
            .channels()
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber {
                connection: self.id,
                online: self.online.clone(),
                sender,
            });

        debug!(connection = self.id, channel = %channel, "Subscribed");
        Ok(Subscription {
            channel: channel.to_string(),
        })
    }

    fn unsubscribe(&self, channel: &str) {
        self.hub.remove(self.id, Some(channel));
        debug!(connection = self.id, channel = %channel, "Unsubscribed");
    }

    fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

impl Drop for MemoryBroker {
    fn drop(&mut self) {
        self.hub.remove(self.id, None);
    }
}
