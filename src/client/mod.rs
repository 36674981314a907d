//! Requesting client.
//!
//! Turns a publish/subscribe broker into request/response calls:
//! - `send`: correlated request on `<pattern>_ack`, replies on `<pattern>_res`
//! - `emit`: fire-and-forget event on the bare pattern channel
//!
//! Concurrent requests on one pattern share a single broker subscription to
//! the response channel; replies are demultiplexed by correlation id.
//! Nothing is retried. A lost connection fails every in-flight request and
//! leaves reconnecting to the caller.

mod routing;
mod stream;

use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, BrokerError, ConnectionEvent, MessageHandler};
use crate::channel::{IntoPattern, Pattern, PatternError};
use crate::codec::{Codec, CodecError, WirePayload};
use crate::packet::{new_correlation_id, Packet};
use routing::{Delivery, RouteGuard, RoutingTable};
use stream::InFlight;

pub use stream::{Call, ResponseStream};

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Errors surfaced to callers of the client.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] PatternError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Remote error: {}", remote_message(.0))]
    Remote(Value),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

impl RpcError {
    /// The `err` payload sent by the responder, for remote failures.
    pub fn remote_payload(&self) -> Option<&Value> {
        match self {
            RpcError::Remote(payload) => Some(payload),
            _ => None,
        }
    }
}

fn remote_message(err: &Value) -> String {
    match err {
        Value::String(message) => message.clone(),
        other => other.to_string(),
    }
}

/// Client side of the request/response bridge.
///
/// Cheap to clone; clones share routing state and the broker connection.
/// Independent clients never see each other's replies.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    /// Create a client over a broker connection.
    pub fn new(broker: Arc<dyn Broker>, codec: Arc<dyn Codec>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                routes: Arc::new(RoutingTable::new(broker.clone())),
                broker,
                codec,
                watcher: Mutex::new(None),
            }),
        }
    }

    /// Describe a request. Nothing is sent until the returned call is consumed.
    pub fn send(&self, pattern: impl IntoPattern, data: Value) -> Call {
        Call::new(self.inner.clone(), pattern.into_pattern(), data)
    }

    /// Publish a fire-and-forget event.
    ///
    /// Resolves once the broker accepted the publish.
    pub async fn emit(&self, pattern: impl IntoPattern, data: Value) -> Result<()> {
        let pattern = pattern.into_pattern()?;
        self.inner.connect().await?;

        let payload = self.inner.codec.serialize(&Packet::event(&pattern, data))?;
        self.inner
            .broker
            .publish(&pattern.event_channel(), payload)
            .await?;

        debug!(pattern = %pattern, "Event published");
        Ok(())
    }

    /// Connect to the broker. Idempotent.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    /// Fail in-flight requests and release the broker connection.
    ///
    /// The client reconnects on next use.
    pub async fn close(&self) {
        self.inner.close().await
    }

    /// Whether the client currently holds a connection.
    pub async fn is_connected(&self) -> bool {
        self.inner.watcher.lock().await.is_some()
    }

    /// Callers currently relying on a response channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner.routes.subscriber_count(channel)
    }

    /// Requests currently awaiting responses.
    pub fn in_flight(&self) -> usize {
        self.inner.routes.in_flight()
    }
}

pub(crate) struct ClientInner {
    broker: Arc<dyn Broker>,
    codec: Arc<dyn Codec>,
    routes: Arc<RoutingTable>,
    /// Connection watcher; present while connected.
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ClientInner {
    async fn connect(self: &Arc<Self>) -> Result<()> {
        let mut watcher = self.watcher.lock().await;
        if watcher.is_some() {
            return Ok(());
        }

        // Listen before connecting so no lifecycle event is missed
        let events = self.broker.events();
        self.broker.connect().await?;
        *watcher = Some(tokio::spawn(watch_connection(
            events,
            Arc::downgrade(self),
        )));

        info!(codec = self.codec.name(), "Client connected");
        Ok(())
    }

    async fn close(&self) {
        if let Some(handle) = self.watcher.lock().await.take() {
            handle.abort();
        }
        let failed = self.routes.fail_all("Client closed");
        if let Err(e) = self.broker.disconnect().await {
            warn!(error = %e, "Broker disconnect failed");
        }
        info!(failed_requests = failed, "Client closed");
    }

    // Called from the watcher task itself, so its handle is dropped, not aborted.
    async fn connection_lost(&self, reason: String) {
        self.watcher.lock().await.take();
        let failed = self.routes.fail_all(&reason);
        error!(reason = %reason, failed_requests = failed, "Broker connection lost");
        if let Err(e) = self.broker.disconnect().await {
            warn!(error = %e, "Broker disconnect failed");
        }
    }

    /// Issue one request/response cycle.
    pub(crate) async fn open(self: Arc<Self>, pattern: Pattern, data: Value) -> Result<InFlight> {
        self.connect().await?;

        let id = new_correlation_id();
        let channel = pattern.res_channel();
        let (sender, receiver) = mpsc::unbounded_channel();
        let ready = self.routes.register(&id, &channel, sender);
        let guard = RouteGuard::new(self.routes.clone(), id.clone());

        // The response channel must be live before the request goes out
        let mut subscribed_here = false;
        ready
            .get_or_try_init(|| {
                subscribed_here = true;
                self.subscribe_responses(&channel)
            })
            .await?;
        if !self
            .routes
            .confirm(&id, &channel, &ready, subscribed_here)
        {
            // Failed while subscribing; the consumer already holds the error
            return Ok(InFlight::new(UnboundedReceiverStream::new(receiver), guard));
        }

        let payload = self
            .codec
            .serialize(&Packet::request(&pattern, data, id.as_str()))?;
        self.broker.publish(&pattern.ack_channel(), payload).await?;

        debug!(pattern = %pattern, id = %id, "Request published");
        Ok(InFlight::new(UnboundedReceiverStream::new(receiver), guard))
    }

    async fn subscribe_responses(&self, channel: &str) -> std::result::Result<(), BrokerError> {
        let routes = Arc::downgrade(&self.routes);
        let codec = self.codec.clone();
        let bound = channel.to_string();
        let handler: MessageHandler = Arc::new(move |payload| {
            if let Some(routes) = routes.upgrade() {
                on_response(&routes, codec.as_ref(), &bound, payload);
            }
        });

        self.broker.subscribe(channel, handler).await?;
        debug!(channel = %channel, "Subscribed response channel");
        Ok(())
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.get_mut().take() {
            handle.abort();
        }
    }
}

fn on_response(routes: &RoutingTable, codec: &dyn Codec, channel: &str, payload: WirePayload) {
    let packet = match codec.deserialize(payload) {
        Ok(packet) => packet,
        Err(e) => {
            warn!(channel = %channel, error = %e, "Dropping malformed response packet");
            return;
        }
    };

    let id = packet.id.clone();
    match routes.route(channel, packet) {
        Delivery::Unmatched => {
            debug!(channel = %channel, id = ?id, "No in-flight request for response")
        }
        Delivery::Delivered => {}
        Delivery::Retired => debug!(channel = %channel, id = ?id, "Request retired"),
    }
}

async fn watch_connection(
    mut events: broadcast::Receiver<ConnectionEvent>,
    client: Weak<ClientInner>,
) {
    loop {
        let reason = match events.recv().await {
            Ok(ConnectionEvent::Connected) => continue,
            Ok(ConnectionEvent::Error(reason)) => reason,
            Ok(ConnectionEvent::Disconnected) => "Broker disconnected".to_string(),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Connection event receiver lagged");
                continue;
            }
            Err(RecvError::Closed) => return,
        };

        if let Some(client) = client.upgrade() {
            client.connection_lost(reason).await;
        }
        return;
    }
}
