//! pubsub-rpc - Request/response over publish/subscribe
//!
//! Layers correlated request/response calls, including streamed responses,
//! and fire-and-forget events on top of any broker that only offers
//! `publish` and `subscribe` on named channels.

pub mod broker;
pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod packet;
pub mod server;
pub mod utils;

pub use broker::{Broker, BrokerError, ConnectionEvent};
pub use channel::{Pattern, PatternError};
pub use client::{Call, ResponseStream, RpcClient, RpcError};
pub use codec::{Codec, CodecKind, IdentityCodec, JsonCodec};
pub use packet::Packet;
pub use server::{
    event_fn, request_fn, stream_fn, Handler, HandlerError, HandlerOutput, RequestContext,
    RpcServer, ServerError,
};
