//! Shared utilities for integration tests.
//!
//! Wires a server and a client over one in-memory hub, with a recording
//! broker on the client side to observe response-channel subscriptions.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pubsub_rpc::broker::{MemoryBroker, MemoryHub, RecordingBroker};
use pubsub_rpc::{CodecKind, RpcClient, RpcServer};

/// Upper bound for any single wait in a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Server and client sharing one hub.
pub struct Harness {
    pub hub: MemoryHub,
    pub server: RpcServer,
    pub client: RpcClient,
    pub client_broker: Arc<RecordingBroker<MemoryBroker>>,
}

impl Harness {
    pub fn new(codec: CodecKind) -> Self {
        let hub = MemoryHub::new();
        let server = RpcServer::new(Arc::new(hub.connection()), codec.build());
        let client_broker = Arc::new(RecordingBroker::new(hub.connection()));
        let client = RpcClient::new(client_broker.clone(), codec.build());
        Self {
            hub,
            server,
            client,
            client_broker,
        }
    }

    /// Another client on the same hub, with its own routing state.
    pub fn second_client(&self, codec: CodecKind) -> RpcClient {
        RpcClient::new(Arc::new(self.hub.connection()), codec.build())
    }
}

/// Await a future, failing the test if it takes longer than `TEST_TIMEOUT`.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .expect("Timed out waiting for future")
}

/// Poll until `check` holds, failing the test on timeout.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    within(async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}
