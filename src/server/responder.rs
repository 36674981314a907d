//! Turns handler output into response packets.
//!
//! Per request the responder moves through
//! `Handling -> Emitting* -> Disposed` or `Handling -> Errored`. One value is
//! held back at all times so the final value travels in the same packet as
//! the disposed flag. Nothing is published once a terminal phase is reached.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::debug;

use super::handler::{HandlerError, HandlerOutput};
use super::Result;
use crate::packet::Packet;

/// Destination for one request's response packets.
#[async_trait]
pub(crate) trait ReplySink: Send + Sync {
    async fn publish(&self, packet: Packet) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Handling,
    Emitting,
    Disposed,
    Errored,
    /// A publish failed; the caller will never see a terminal packet.
    Abandoned,
}

impl Phase {
    fn is_terminal(self) -> bool {
        matches!(self, Phase::Disposed | Phase::Errored | Phase::Abandoned)
    }
}

pub(crate) struct Responder<S> {
    sink: S,
    id: String,
    phase: Phase,
    pending: Option<Value>,
}

impl<S: ReplySink> Responder<S> {
    pub(crate) fn new(sink: S, id: impl Into<String>) -> Self {
        Self {
            sink,
            id: id.into(),
            phase: Phase::Handling,
            pending: None,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    /// Queue a value, publishing the previously queued one.
    pub(crate) async fn emit(&mut self, value: Value) -> Result<()> {
        if self.phase.is_terminal() {
            return Ok(());
        }
        self.phase = Phase::Emitting;
        match self.pending.replace(value) {
            Some(previous) => self.send(Packet::reply(&self.id, Some(previous), false)).await,
            None => Ok(()),
        }
    }

    /// Publish the disposed packet, carrying the last queued value if any.
    pub(crate) async fn complete(&mut self) -> Result<()> {
        if self.phase.is_terminal() {
            return Ok(());
        }
        let last = self.pending.take();
        self.send(Packet::reply(&self.id, last, true)).await?;
        self.phase = Phase::Disposed;
        Ok(())
    }

    /// Flush the queued value, then publish the error packet.
    pub(crate) async fn fail(&mut self, error: HandlerError) -> Result<()> {
        if self.phase.is_terminal() {
            return Ok(());
        }
        if let Some(previous) = self.pending.take() {
            self.send(Packet::reply(&self.id, Some(previous), false))
                .await?;
        }
        self.send(Packet::failure(&self.id, error.into_payload()))
            .await?;
        self.phase = Phase::Errored;
        Ok(())
    }

    async fn send(&mut self, packet: Packet) -> Result<()> {
        let result = self.sink.publish(packet).await;
        if result.is_err() {
            self.phase = Phase::Abandoned;
            self.pending = None;
        }
        result
    }
}

/// Drive a handler result to a terminal phase.
pub(crate) async fn respond<S: ReplySink>(
    mut responder: Responder<S>,
    output: std::result::Result<HandlerOutput, HandlerError>,
) -> Result<Phase> {
    match output {
        Ok(HandlerOutput::Single(value)) => {
            responder.emit(value).await?;
            responder.complete().await?;
        }
        Ok(HandlerOutput::Stream(mut values)) => {
            let mut emitted = 0usize;
            while let Some(item) = values.next().await {
                match item {
                    Ok(value) => {
                        responder.emit(value).await?;
                        emitted += 1;
                    }
                    Err(e) => {
                        debug!(id = %responder.id, emitted, "Handler stream failed");
                        responder.fail(e).await?;
                        break;
                    }
                }
            }
            responder.complete().await?;
        }
        Err(e) => responder.fail(e).await?,
    }
    Ok(responder.phase())
}
