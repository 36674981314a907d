//! Lazy response sequences.
//!
//! `Call` describes a request without performing it. Each call to
//! [`Call::stream`] yields a fresh `ResponseStream`; polling that stream for
//! the first time mints a correlation id, subscribes the response channel if
//! needed, and publishes the request. Dropping the stream before it finishes
//! cancels the request locally.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::Value;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::routing::{Reply, RouteGuard};
use super::{ClientInner, RpcError};
use crate::channel::{Pattern, PatternError};

/// A request that has not been sent yet.
#[derive(Clone)]
pub struct Call {
    client: Arc<ClientInner>,
    pattern: Result<Pattern, PatternError>,
    data: Value,
}

impl Call {
    pub(crate) fn new(
        client: Arc<ClientInner>,
        pattern: Result<Pattern, PatternError>,
        data: Value,
    ) -> Self {
        Self {
            client,
            pattern,
            data,
        }
    }

    /// Start a new request/response cycle when first polled.
    pub fn stream(&self) -> ResponseStream {
        let client = self.client.clone();
        let pattern = self.pattern.clone();
        let data = self.data.clone();

        let opening = async move {
            match pattern {
                Ok(pattern) => client.open(pattern, data).await,
                Err(e) => Err(RpcError::from(e)),
            }
        };
        let inner = stream::once(opening)
            .flat_map(|opened| match opened {
                Ok(in_flight) => in_flight.boxed(),
                Err(e) => stream::once(async move { Err(e) }).boxed(),
            })
            .boxed();

        ResponseStream { inner }
    }

    /// Send the request and gather every response value.
    pub async fn collect(&self) -> Result<Vec<Value>, RpcError> {
        let mut stream = self.stream();
        let mut values = Vec::new();
        while let Some(item) = stream.next().await {
            values.push(item?);
        }
        Ok(values)
    }

    /// Send the request and resolve with the final response value.
    pub async fn last(&self) -> Result<Option<Value>, RpcError> {
        Ok(self.collect().await?.pop())
    }
}

/// Response values for one request, then completion or an error.
pub struct ResponseStream {
    inner: BoxStream<'static, Result<Value, RpcError>>,
}

impl Stream for ResponseStream {
    type Item = Result<Value, RpcError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// A published request awaiting replies.
pub(crate) struct InFlight {
    replies: UnboundedReceiverStream<Reply>,
    finished: bool,
    _guard: RouteGuard,
}

impl InFlight {
    pub(crate) fn new(replies: UnboundedReceiverStream<Reply>, guard: RouteGuard) -> Self {
        Self {
            replies,
            finished: false,
            _guard: guard,
        }
    }
}

impl Stream for InFlight {
    type Item = Result<Value, RpcError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.replies).poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Reply::Next(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Some(Reply::Failed(e))) => {
                self.finished = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(Some(Reply::Complete)) | Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
        }
    }
}
