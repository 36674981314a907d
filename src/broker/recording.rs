//! Call-recording broker decorator.
//!
//! Wraps any broker and counts calls per channel without changing behavior,
//! except for optional publish-failure injection. Used to observe
//! subscription multiplexing from tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{Broker, BrokerError, ConnectionEvent, MessageHandler, Result, Subscription};
use crate::codec::WirePayload;

#[derive(Debug, Default)]
struct Calls {
    subscribes: HashMap<String, usize>,
    unsubscribes: HashMap<String, usize>,
    published: Vec<(String, WirePayload)>,
}

/// Broker wrapper that records every call it forwards.
///
/// # Example
///
/// ```ignore
/// let broker = Arc::new(RecordingBroker::new(hub.connection()));
/// let client = RpcClient::new(broker.clone(), Arc::new(IdentityCodec));
/// // ...
/// assert_eq!(broker.unsubscribe_count("/get-customers_res"), 1);
/// ```
pub struct RecordingBroker<B> {
    inner: B,
    calls: Mutex<Calls>,
    fail_on_publish: AtomicBool,
}

impl<B> RecordingBroker<B> {
    /// Wrap a broker.
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            calls: Mutex::new(Calls::default()),
            fail_on_publish: AtomicBool::new(false),
        }
    }

    /// Get a reference to the wrapped broker.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Make subsequent publishes fail without reaching the wrapped broker.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Subscribe calls made for a channel.
    pub fn subscribe_count(&self, channel: &str) -> usize {
        self.calls().subscribes.get(channel).copied().unwrap_or(0)
    }

    /// Unsubscribe calls made for a channel.
    pub fn unsubscribe_count(&self, channel: &str) -> usize {
        self.calls().unsubscribes.get(channel).copied().unwrap_or(0)
    }

    /// Successful publishes made to a channel.
    pub fn publish_count(&self, channel: &str) -> usize {
        self.calls()
            .published
            .iter()
            .filter(|(c, _)| c == channel)
            .count()
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<(String, WirePayload)> {
        self.calls().published.clone()
    }

    fn calls(&self) -> MutexGuard<'_, Calls> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<B: Broker> Broker for RecordingBroker<B> {
    async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await
    }

    async fn publish(&self, channel: &str, payload: WirePayload) -> Result<()> {
        if self.fail_on_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish {
                channel: channel.to_string(),
                message: "Recording broker publish failure".to_string(),
            });
        }
        self.inner.publish(channel, payload.clone()).await?;
        self.calls().published.push((channel.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<Subscription> {
        let subscription = self.inner.subscribe(channel, handler).await?;
        *self
            .calls()
            .subscribes
            .entry(channel.to_string())
            .or_default() += 1;
        Ok(subscription)
    }

    fn unsubscribe(&self, channel: &str) {
        *self
            .calls()
            .unsubscribes
            .entry(channel.to_string())
            .or_default() += 1;
        self.inner.unsubscribe(channel);
    }

    fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events()
    }
}
