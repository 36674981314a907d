//! Integration tests for pubsub-rpc over the in-memory broker.

mod common;

#[path = "rpc/request_test.rs"]
mod request_test;

#[path = "rpc/stream_test.rs"]
mod stream_test;

#[path = "rpc/multiplex_test.rs"]
mod multiplex_test;

#[path = "rpc/event_test.rs"]
mod event_test;
