//! Handler contracts for the responding server.
//!
//! Request handlers declare their output shape explicitly through
//! [`HandlerOutput`]: a single value, or a stream of values. Event handlers
//! produce nothing.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::Value;

use crate::channel::{ChannelKind, Pattern};

/// Where an inbound packet came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Registered pattern the packet was dispatched to.
    pub pattern: Pattern,
    /// Physical channel the packet arrived on.
    pub channel: String,
    /// Correlation id, for requests.
    pub id: Option<String>,
}

/// Failure raised by user handler code.
///
/// The payload travels to the caller verbatim as the response packet's `err`.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerError {
    payload: Value,
}

impl HandlerError {
    /// Error with a text message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            payload: Value::String(message.into()),
        }
    }

    /// Error with a structured payload.
    pub fn with_payload(payload: Value) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Value::String(message) => f.write_str(message),
            other => write!(f, "{}", other),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Values produced by a stream handler.
pub type ValueStream = BoxStream<'static, Result<Value, HandlerError>>;

/// What a request handler produced.
pub enum HandlerOutput {
    /// Exactly one value.
    Single(Value),
    /// Zero or more values, then completion or an error.
    Stream(ValueStream),
}

impl HandlerOutput {
    /// Wrap any stream of fallible values.
    pub fn stream<S>(values: S) -> Self
    where
        S: Stream<Item = Result<Value, HandlerError>> + Send + 'static,
    {
        HandlerOutput::Stream(values.boxed())
    }

    /// A stream that yields the given values and completes.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        let values: Vec<Result<Value, HandlerError>> = values.into_iter().map(Ok).collect();
        HandlerOutput::Stream(stream::iter(values).boxed())
    }

    /// A stream that completes without values.
    pub fn empty() -> Self {
        HandlerOutput::Stream(stream::empty().boxed())
    }
}

impl fmt::Debug for HandlerOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerOutput::Single(value) => f.debug_tuple("Single").field(value).finish(),
            HandlerOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Value> for HandlerOutput {
    fn from(value: Value) -> Self {
        HandlerOutput::Single(value)
    }
}

/// Request/response handler.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, ctx: RequestContext, data: Value)
        -> Result<HandlerOutput, HandlerError>;
}

/// Fire-and-forget event handler.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, ctx: RequestContext, data: Value) -> Result<(), HandlerError>;
}

/// A handler bound to a pattern, tagged with its kind.
#[derive(Clone)]
pub enum Handler {
    Request(Arc<dyn RequestHandler>),
    Event(Arc<dyn EventHandler>),
}

impl Handler {
    /// Whether packets for this handler arrive as events.
    pub fn is_event(&self) -> bool {
        matches!(self, Handler::Event(_))
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            Handler::Request(_) => ChannelKind::Request,
            Handler::Event(_) => ChannelKind::Event,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Request(_) => f.write_str("Handler::Request"),
            Handler::Event(_) => f.write_str("Handler::Event"),
        }
    }
}

struct RequestFn<F>(F);

#[async_trait]
impl<F, Fut> RequestHandler for RequestFn<F>
where
    F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        ctx: RequestContext,
        data: Value,
    ) -> Result<HandlerOutput, HandlerError> {
        (self.0)(ctx, data).await.map(HandlerOutput::Single)
    }
}

struct StreamFn<F>(F);

#[async_trait]
impl<F, S> RequestHandler for StreamFn<F>
where
    F: Fn(RequestContext, Value) -> S + Send + Sync + 'static,
    S: Stream<Item = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        ctx: RequestContext,
        data: Value,
    ) -> Result<HandlerOutput, HandlerError> {
        Ok(HandlerOutput::stream((self.0)(ctx, data)))
    }
}

struct EventFn<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for EventFn<F>
where
    F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: RequestContext, data: Value) -> Result<(), HandlerError> {
        (self.0)(ctx, data).await
    }
}

/// Request handler from an async closure producing one value.
pub fn request_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Handler::Request(Arc::new(RequestFn(f)))
}

/// Request handler from a closure producing a stream of values.
pub fn stream_fn<F, S>(f: F) -> Handler
where
    F: Fn(RequestContext, Value) -> S + Send + Sync + 'static,
    S: Stream<Item = Result<Value, HandlerError>> + Send + 'static,
{
    Handler::Request(Arc::new(StreamFn(f)))
}

/// Event handler from an async closure.
pub fn event_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Handler::Event(Arc::new(EventFn(f)))
}
