//! Response-channel sharing and correlation tests.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::common::{eventually, within, Harness};
use pubsub_rpc::server::request_fn;
use pubsub_rpc::{CodecKind, HandlerError, RpcError};

/// Echo handler that answers only as permits are released.
fn gated_echo(permits: Arc<Semaphore>) -> pubsub_rpc::Handler {
    request_fn(move |_, data: Value| {
        let permits = permits.clone();
        async move {
            permits
                .acquire()
                .await
                .map_err(|e| HandlerError::new(e.to_string()))?
                .forget();
            Ok::<_, HandlerError>(data)
        }
    })
}

#[tokio::test]
async fn test_concurrent_callers_share_one_subscription() {
    let h = Harness::new(CodecKind::Identity);
    let permits = Arc::new(Semaphore::new(0));
    h.server
        .register("/get-customers", gated_echo(permits.clone()))
        .unwrap();
    h.server.start().await.unwrap();

    let first = tokio::spawn({
        let call = h.client.send("/get-customers", json!("first"));
        async move { call.last().await }
    });
    let second = tokio::spawn({
        let call = h.client.send("/get-customers", json!("second"));
        async move { call.last().await }
    });

    eventually(|| h.client.subscriber_count("/get-customers_res") == 2).await;
    assert_eq!(h.client_broker.subscribe_count("/get-customers_res"), 1);

    permits.add_permits(1);
    let one = within(async {
        loop {
            if first.is_finished() || second.is_finished() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    });
    one.await;
    assert_eq!(h.client.subscriber_count("/get-customers_res"), 1);
    assert_eq!(h.client_broker.unsubscribe_count("/get-customers_res"), 0);

    permits.add_permits(1);
    let first = within(first).await.unwrap().unwrap();
    let second = within(second).await.unwrap().unwrap();
    assert_eq!(first, Some(json!("first")));
    assert_eq!(second, Some(json!("second")));

    assert_eq!(h.client.subscriber_count("/get-customers_res"), 0);
    assert_eq!(h.client_broker.unsubscribe_count("/get-customers_res"), 1);
}

#[tokio::test]
async fn test_many_concurrent_requests_each_get_their_own_reply() {
    let h = Harness::new(CodecKind::Json);
    h.server
        .register(
            "/double",
            request_fn(|_, data: Value| async move {
                let n = data.as_i64().ok_or_else(|| HandlerError::from("not a number"))?;
                Ok::<_, HandlerError>(json!(n * 2))
            }),
        )
        .unwrap();
    h.server.start().await.unwrap();

    let calls: Vec<_> = (0..20)
        .map(|n| {
            let call = h.client.send("/double", json!(n));
            tokio::spawn(async move { (n, call.last().await) })
        })
        .collect();

    for handle in calls {
        let (n, result) = within(handle).await.unwrap();
        assert_eq!(result.unwrap(), Some(json!(n * 2)));
    }
    assert_eq!(h.client.in_flight(), 0);
    assert_eq!(h.client.subscriber_count("/double_res"), 0);
    assert_eq!(
        h.client_broker.subscribe_count("/double_res"),
        h.client_broker.unsubscribe_count("/double_res")
    );
}

#[tokio::test]
async fn test_independent_clients_do_not_cross_talk() {
    let h = Harness::new(CodecKind::Identity);
    h.server
        .register("/echo", request_fn(|_, data| async move { Ok::<_, HandlerError>(data) }))
        .unwrap();
    h.server.start().await.unwrap();
    let other = h.second_client(CodecKind::Identity);

    let mine = h.client.send("/echo", json!("mine"));
    let theirs = other.send("/echo", json!("theirs"));
    let (mine, theirs) = tokio::join!(within(mine.collect()), within(theirs.collect()));
    // Both clients listen on /echo_res, yet each sees only its own reply
    assert_eq!(mine.unwrap(), vec![json!("mine")]);
    assert_eq!(theirs.unwrap(), vec![json!("theirs")]);
}

#[tokio::test]
async fn test_connection_failure_fails_outstanding_requests() {
    let h = Harness::new(CodecKind::Identity);
    let permits = Arc::new(Semaphore::new(0));
    h.server.register("/hang", gated_echo(permits)).unwrap();
    h.server.start().await.unwrap();

    let pending = tokio::spawn({
        let call = h.client.send("/hang", json!({}));
        async move { call.last().await }
    });
    eventually(|| h.client.in_flight() == 1).await;

    h.client_broker.inner().fail("socket reset");

    let result = within(pending).await.unwrap();
    assert!(matches!(result, Err(RpcError::ConnectionLost(ref r)) if r == "socket reset"));
    assert_eq!(h.client.in_flight(), 0);
    assert!(!h.client.is_connected().await);
}
