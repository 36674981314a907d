//! Correlation routing and response-channel reference counting.
//!
//! Every in-flight request owns one route (correlation id -> reply sender)
//! and holds one reference on its response channel. The broker-level
//! subscription for a channel is released when its last reference goes.
//!
//! Retirement happens exactly once per id: on an error packet, on a disposed
//! packet, on cancellation, or when the connection is lost. Later packets for
//! a retired id find no route and are dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::{mpsc, OnceCell};
use tracing::debug;

use super::RpcError;
use crate::broker::Broker;
use crate::packet::Packet;

/// Signal delivered to the consumer of a response stream.
#[derive(Debug)]
pub(crate) enum Reply {
    Next(Value),
    Complete,
    Failed(RpcError),
}

/// Outcome of routing one inbound response packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// No in-flight request on this channel has the packet's id.
    Unmatched,
    /// Interim value handed to the consumer.
    Delivered,
    /// Terminal packet; the route is gone.
    Retired,
}

struct Route {
    channel: String,
    sender: mpsc::UnboundedSender<Reply>,
}

struct ChannelSlot {
    refs: usize,
    ready: Arc<OnceCell<()>>,
}

#[derive(Default)]
struct RoutingState {
    routes: HashMap<String, Route>,
    channels: HashMap<String, ChannelSlot>,
}

/// Routing state owned by one client.
pub(crate) struct RoutingTable {
    broker: Arc<dyn Broker>,
    state: Mutex<RoutingState>,
}

impl RoutingTable {
    pub(crate) fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            state: Mutex::new(RoutingState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RoutingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a route and take a reference on its response channel.
    ///
    /// Returns the channel's readiness cell. Whoever initializes it performs
    /// the broker-level subscribe; every other caller waits for that.
    pub(crate) fn register(
        &self,
        id: &str,
        channel: &str,
        sender: mpsc::UnboundedSender<Reply>,
    ) -> Arc<OnceCell<()>> {
        let mut state = self.state();
        let slot = state
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| ChannelSlot {
                refs: 0,
                ready: Arc::new(OnceCell::new()),
            });
        slot.refs += 1;
        let ready = slot.ready.clone();
        state.routes.insert(
            id.to_string(),
            Route {
                channel: channel.to_string(),
                sender,
            },
        );
        ready
    }

    /// Remove a route without notifying its consumer.
    ///
    /// No-op if the id was already retired.
    pub(crate) fn retire(&self, id: &str) {
        let mut state = self.state();
        if let Some(route) = state.routes.remove(id) {
            self.release(&mut state, &route.channel);
        }
    }

    /// Check a route after its response channel subscription completed.
    ///
    /// Returns false if `id` was retired meanwhile. A subscription made by
    /// this caller whose slot was released before it landed is undone here,
    /// since the release could not unsubscribe an uninitialized slot.
    pub(crate) fn confirm(
        &self,
        id: &str,
        channel: &str,
        ready: &Arc<OnceCell<()>>,
        subscribed_here: bool,
    ) -> bool {
        let state = self.state();
        let slot_live = state
            .channels
            .get(channel)
            .is_some_and(|slot| Arc::ptr_eq(&slot.ready, ready));
        if subscribed_here && !slot_live {
            self.broker.unsubscribe(channel);
            debug!(channel = %channel, "Released orphaned response channel");
        }
        state.routes.contains_key(id)
    }

    /// Route a decoded response packet that arrived on `channel`.
    pub(crate) fn route(&self, channel: &str, packet: Packet) -> Delivery {
        let Some(id) = packet.id.as_deref() else {
            return Delivery::Unmatched;
        };

        let mut state = self.state();
        let matched = state
            .routes
            .get(id)
            .is_some_and(|route| route.channel == channel);
        if !matched {
            return Delivery::Unmatched;
        }

        if let Some(err) = packet.err {
            if let Some(route) = state.routes.remove(id) {
                let _ = route.sender.send(Reply::Failed(RpcError::Remote(err)));
                self.release(&mut state, &route.channel);
            }
            return Delivery::Retired;
        }

        if packet.is_disposed {
            if let Some(route) = state.routes.remove(id) {
                if let Some(value) = packet.response {
                    let _ = route.sender.send(Reply::Next(value));
                }
                let _ = route.sender.send(Reply::Complete);
                self.release(&mut state, &route.channel);
            }
            return Delivery::Retired;
        }

        if let (Some(value), Some(route)) = (packet.response, state.routes.get(id)) {
            let _ = route.sender.send(Reply::Next(value));
        }
        Delivery::Delivered
    }

    /// Fail and retire every in-flight request.
    pub(crate) fn fail_all(&self, reason: &str) -> usize {
        let mut state = self.state();
        let routes: Vec<Route> = state.routes.drain().map(|(_, route)| route).collect();
        for route in &routes {
            let _ = route
                .sender
                .send(Reply::Failed(RpcError::ConnectionLost(reason.to_string())));
            self.release(&mut state, &route.channel);
        }
        routes.len()
    }

    /// Callers currently relying on a response channel.
    pub(crate) fn subscriber_count(&self, channel: &str) -> usize {
        self.state().channels.get(channel).map_or(0, |slot| slot.refs)
    }

    /// Requests currently awaiting responses.
    pub(crate) fn in_flight(&self) -> usize {
        self.state().routes.len()
    }

    // Runs under the state lock so a concurrent register for the same
    // channel cannot subscribe before this unsubscribe lands.
    fn release(&self, state: &mut RoutingState, channel: &str) {
        let Some(slot) = state.channels.get_mut(channel) else {
            return;
        };
        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs > 0 {
            return;
        }
        if let Some(slot) = state.channels.remove(channel) {
            if slot.ready.initialized() {
                self.broker.unsubscribe(channel);
                debug!(channel = %channel, "Released response channel");
            }
        }
    }
}

/// Retires a route when the consumer goes away.
pub(crate) struct RouteGuard {
    table: Arc<RoutingTable>,
    id: String,
}

impl RouteGuard {
    pub(crate) fn new(table: Arc<RoutingTable>, id: String) -> Self {
        Self { table, id }
    }
}

impl Drop for RouteGuard {
    fn drop(&mut self) {
        self.table.retire(&self.id);
    }
}
