//! Responding server.
//!
//! Binds handlers to patterns and serves them over a broker:
//! - request handlers listen on `<pattern>_ack` and answer on `<pattern>_res`
//! - event handlers listen on the bare pattern channel and answer nothing
//!
//! Registration is closed while the server runs. Handler failures become
//! `err` packets for requests and log lines for events; neither stops the
//! server.

mod handler;
mod registry;
mod responder;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, BrokerError, ConnectionEvent, MessageHandler};
use crate::channel::{IntoPattern, PatternError};
use crate::codec::{Codec, CodecError, WirePayload};
use crate::packet::Packet;
use registry::{Binding, HandlerRegistry};
use responder::{respond, ReplySink, Responder};

pub use handler::{
    event_fn, request_fn, stream_fn, EventHandler, Handler, HandlerError, HandlerOutput,
    RequestContext, RequestHandler, ValueStream,
};

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors that can occur while configuring or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] PatternError),

    #[error("Handler already registered for pattern '{0}'")]
    DuplicatePattern(String),

    #[error("Pattern '{pattern}' listens on '{channel}', already used by '{existing}'")]
    ChannelConflict {
        pattern: String,
        channel: String,
        existing: String,
    },

    #[error("Cannot register handlers while the server is running")]
    AlreadyRunning,

    #[error("Server is not running")]
    NotRunning,

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Liveness of one start/stop cycle.
#[derive(Debug)]
struct Session {
    /// Cleared by `stop()`; responses are no longer published.
    live: AtomicBool,
    /// Cleared while the broker reports the connection as down.
    online: AtomicBool,
}

impl Session {
    fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            online: AtomicBool::new(true),
        }
    }
}

#[derive(Default)]
struct ServerState {
    registry: HandlerRegistry,
    session: Option<Arc<Session>>,
}

#[derive(Default)]
struct Lifecycle {
    watcher: Option<JoinHandle<()>>,
    channels: Vec<String>,
}

/// Server side of the request/response bridge.
///
/// # Example
///
/// ```ignore
/// let server = RpcServer::new(broker, Arc::new(IdentityCodec));
/// server.register("/get-customers", request_fn(|_, _| async {
///     Ok(json!({"customers": []}))
/// }))?;
/// server.start().await?;
/// ```
#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    broker: Arc<dyn Broker>,
    codec: Arc<dyn Codec>,
    state: Mutex<ServerState>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl RpcServer {
    /// Create a server over a broker connection.
    pub fn new(broker: Arc<dyn Broker>, codec: Arc<dyn Codec>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                broker,
                codec,
                state: Mutex::new(ServerState::default()),
                lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
            }),
        }
    }

    /// Bind a handler to a pattern.
    ///
    /// Fails for duplicate patterns, for patterns whose inbound channel is
    /// already taken, and while the server is running.
    pub fn register(&self, pattern: impl IntoPattern, handler: Handler) -> Result<()> {
        let pattern = pattern.into_pattern()?;
        let mut state = self.inner.state();
        if state.session.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        debug!(pattern = %pattern, kind = ?handler.kind(), "Registering handler");
        state.registry.insert(pattern, handler)
    }

    /// Bind a request/response handler.
    pub fn add_request_handler<H>(&self, pattern: impl IntoPattern, handler: H) -> Result<()>
    where
        H: RequestHandler + 'static,
    {
        self.register(pattern, Handler::Request(Arc::new(handler)))
    }

    /// Bind a fire-and-forget event handler.
    pub fn add_event_handler<H>(&self, pattern: impl IntoPattern, handler: H) -> Result<()>
    where
        H: EventHandler + 'static,
    {
        self.register(pattern, Handler::Event(Arc::new(handler)))
    }

    /// Registered patterns, in order.
    pub fn patterns(&self) -> Vec<String> {
        self.inner
            .state()
            .registry
            .patterns()
            .into_iter()
            .map(|p| p.to_string())
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.inner.state().session.is_some()
    }

    /// Connect and subscribe every registered pattern. Idempotent.
    pub async fn start(&self) -> Result<()> {
        self.inner.start().await
    }

    /// Unsubscribe and release the broker connection.
    ///
    /// Handlers already running finish, but their responses are dropped.
    pub async fn stop(&self) -> Result<()> {
        self.inner.stop().await
    }
}

impl ServerInner {
    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn start(self: &Arc<Self>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;

        let session = Arc::new(Session::new());
        let bindings: Vec<Binding> = {
            let mut state = self.state();
            if state.session.is_some() {
                return Ok(());
            }
            state.session = Some(session.clone());
            state.registry.bindings().cloned().collect()
        };

        match self.open(&session, &bindings).await {
            Ok((watcher, channels)) => {
                lifecycle.watcher = Some(watcher);
                lifecycle.channels = channels;
                info!(
                    patterns = bindings.len(),
                    codec = self.codec.name(),
                    "Server started"
                );
                Ok(())
            }
            Err(e) => {
                session.live.store(false, Ordering::SeqCst);
                self.state().session = None;
                error!(error = %e, "Server failed to start");
                Err(e)
            }
        }
    }

    async fn open(
        self: &Arc<Self>,
        session: &Arc<Session>,
        bindings: &[Binding],
    ) -> Result<(JoinHandle<()>, Vec<String>)> {
        // Listen before connecting so no lifecycle event is missed
        let events = self.broker.events();
        self.broker.connect().await?;

        let runtime = Handle::current();
        let mut channels: Vec<String> = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let handler = self.message_handler(binding.clone(), session.clone(), runtime.clone());
            if let Err(e) = self.broker.subscribe(&binding.channel, handler).await {
                for channel in &channels {
                    self.broker.unsubscribe(channel);
                }
                if let Err(e) = self.broker.disconnect().await {
                    warn!(error = %e, "Broker disconnect failed");
                }
                return Err(e.into());
            }
            debug!(pattern = %binding.pattern, channel = %binding.channel, "Listening");
            channels.push(binding.channel.clone());
        }

        let watcher = tokio::spawn(watch_connection(events, session.clone()));
        Ok((watcher, channels))
    }

    async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(session) = self.state().session.take() else {
            return Ok(());
        };
        session.live.store(false, Ordering::SeqCst);

        if let Some(watcher) = lifecycle.watcher.take() {
            watcher.abort();
        }
        for channel in lifecycle.channels.drain(..) {
            self.broker.unsubscribe(&channel);
        }
        self.broker.disconnect().await?;

        info!("Server stopped");
        Ok(())
    }

    fn message_handler(
        self: &Arc<Self>,
        binding: Binding,
        session: Arc<Session>,
        runtime: Handle,
    ) -> MessageHandler {
        let server = Arc::downgrade(self);
        let binding = Arc::new(binding);
        Arc::new(move |payload| {
            let server = server.clone();
            let binding = binding.clone();
            let session = session.clone();
            runtime.spawn(async move {
                if let Some(server) = Weak::upgrade(&server) {
                    server.dispatch(&binding, &session, payload).await;
                }
            });
        })
    }

    async fn dispatch(&self, binding: &Binding, session: &Arc<Session>, payload: WirePayload) {
        if !session.live.load(Ordering::SeqCst) {
            return;
        }
        if !session.online.load(Ordering::SeqCst) {
            debug!(channel = %binding.channel, "Connection down, dropping inbound packet");
            return;
        }

        let packet = match self.codec.deserialize(payload) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(channel = %binding.channel, error = %e, "Dropping malformed packet");
                return;
            }
        };

        let data = packet.data_or_null();
        let ctx = RequestContext {
            pattern: binding.pattern.clone(),
            channel: binding.channel.clone(),
            id: packet.id.clone(),
        };

        match &binding.handler {
            Handler::Event(handler) => {
                if let Err(e) = handler.handle(ctx, data).await {
                    error!(pattern = %binding.pattern, error = %e, "Event handler failed");
                }
            }
            Handler::Request(handler) => {
                let Some(id) = packet.id else {
                    warn!(pattern = %binding.pattern, "Request without correlation id dropped");
                    return;
                };
                self.serve_request(binding, session, handler.as_ref(), ctx, data, id)
                    .await;
            }
        }
    }

    async fn serve_request(
        &self,
        binding: &Binding,
        session: &Arc<Session>,
        handler: &dyn RequestHandler,
        ctx: RequestContext,
        data: Value,
        id: String,
    ) {
        let output = handler.handle(ctx, data).await;
        if let Err(e) = &output {
            warn!(pattern = %binding.pattern, id = %id, error = %e, "Request handler failed");
        }

        let sink = BrokerSink {
            broker: self.broker.clone(),
            codec: self.codec.clone(),
            channel: binding.pattern.res_channel(),
            session: session.clone(),
        };
        match respond(Responder::new(sink, id.as_str()), output).await {
            Ok(phase) => debug!(pattern = %binding.pattern, id = %id, phase = ?phase, "Request served"),
            Err(e) => {
                warn!(pattern = %binding.pattern, id = %id, error = %e, "Response abandoned")
            }
        }
    }
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        if let Some(watcher) = self.lifecycle.get_mut().watcher.take() {
            watcher.abort();
        }
    }
}

/// Publishes a request's responses to its `_res` channel.
struct BrokerSink {
    broker: Arc<dyn Broker>,
    codec: Arc<dyn Codec>,
    channel: String,
    session: Arc<Session>,
}

#[async_trait]
impl ReplySink for BrokerSink {
    async fn publish(&self, packet: Packet) -> Result<()> {
        if !self.session.live.load(Ordering::SeqCst) {
            return Err(ServerError::NotRunning);
        }
        let payload = self.codec.serialize(&packet)?;
        self.broker.publish(&self.channel, payload).await?;
        Ok(())
    }
}

async fn watch_connection(mut events: broadcast::Receiver<ConnectionEvent>, session: Arc<Session>) {
    loop {
        match events.recv().await {
            Ok(ConnectionEvent::Connected) => {
                if !session.online.swap(true, Ordering::SeqCst) {
                    info!("Broker connection restored, resuming dispatch");
                }
            }
            Ok(ConnectionEvent::Error(reason)) => {
                session.online.store(false, Ordering::SeqCst);
                error!(reason = %reason, "Broker connection lost, suspending dispatch");
            }
            Ok(ConnectionEvent::Disconnected) => {
                session.online.store(false, Ordering::SeqCst);
                warn!("Broker disconnected, suspending dispatch");
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Connection event receiver lagged");
            }
            Err(RecvError::Closed) => return,
        }
    }
}
