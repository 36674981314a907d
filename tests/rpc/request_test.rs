//! Single-value request/response tests.

use futures::StreamExt;
use serde_json::{json, Value};
use tokio_test::{assert_pending, assert_ready};

use crate::common::{eventually, within, Harness};
use pubsub_rpc::server::request_fn;
use pubsub_rpc::{CodecKind, HandlerError, RpcError};

fn customers_handler() -> pubsub_rpc::Handler {
    request_fn(|_, data: Value| async move {
        let all = json!([{"id": 1, "name": "Acme, Inc."}, {"id": 2, "name": "Globex"}]);
        match data.get("customerId").and_then(Value::as_u64) {
            Some(id) => {
                let matched: Vec<Value> = all
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter(|c| c["id"] == json!(id))
                    .cloned()
                    .collect();
                Ok(json!({ "customers": matched }))
            }
            None => Ok(json!({ "customers": [{"id": 1, "name": "Acme, Inc."}] })),
        }
    })
}

#[tokio::test]
async fn test_get_customers_yields_one_value_then_completes() {
    for codec in [CodecKind::Identity, CodecKind::Json] {
        let h = Harness::new(codec);
        h.server.register("/get-customers", customers_handler()).unwrap();
        h.server.start().await.unwrap();

        let values = within(h.client.send("/get-customers", json!({})).collect())
            .await
            .unwrap();
        assert_eq!(
            values,
            vec![json!({"customers": [{"id": 1, "name": "Acme, Inc."}]})]
        );
    }
}

#[tokio::test]
async fn test_request_data_reaches_handler() {
    let h = Harness::new(CodecKind::Identity);
    h.server.register("/get-customers", customers_handler()).unwrap();
    h.server.start().await.unwrap();

    let value = within(
        h.client
            .send("/get-customers", json!({"customerId": 2}))
            .last(),
    )
    .await
    .unwrap();
    assert_eq!(
        value,
        Some(json!({"customers": [{"id": 2, "name": "Globex"}]}))
    );
}

#[tokio::test]
async fn test_handler_error_surfaces_without_values() {
    let h = Harness::new(CodecKind::Json);
    h.server
        .register(
            "/explode",
            request_fn(|_, _| async { Err(HandlerError::from("boom")) }),
        )
        .unwrap();
    h.server.start().await.unwrap();

    let mut stream = h.client.send("/explode", json!({})).stream();
    let first = within(stream.next()).await.expect("stream ended early");
    match first {
        Err(RpcError::Remote(payload)) => assert_eq!(payload, json!("boom")),
        other => panic!("expected remote error, got {:?}", other),
    }
    assert!(within(stream.next()).await.is_none());
    assert_eq!(h.client.in_flight(), 0);
}

#[tokio::test]
async fn test_nothing_sent_until_first_poll() {
    let h = Harness::new(CodecKind::Identity);
    let gate = std::sync::Arc::new(tokio::sync::Notify::new());
    let release = gate.clone();
    h.server
        .register(
            "/slow",
            request_fn(move |_, _| {
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    Ok::<_, HandlerError>(json!("done"))
                }
            }),
        )
        .unwrap();
    h.server.start().await.unwrap();

    let call = h.client.send("/slow", Value::Null);
    let mut task = tokio_test::task::spawn(call.stream());
    assert_eq!(h.client_broker.publish_count("/slow_ack"), 0);

    assert_pending!(task.poll_next());
    assert_eq!(h.client_broker.publish_count("/slow_ack"), 1);
    assert_eq!(h.client.in_flight(), 1);

    release.notify_one();
    eventually(|| task.is_woken()).await;
    let value = assert_ready!(task.poll_next());
    assert_eq!(value.unwrap().unwrap(), json!("done"));
}

#[tokio::test]
async fn test_unregistered_pattern_never_answers() {
    let h = Harness::new(CodecKind::Identity);
    h.server.start().await.unwrap();

    let result = tokio::time::timeout(
        std::time::Duration::from_millis(100),
        h.client.send("/nobody-home", json!({})).last(),
    )
    .await;
    assert!(result.is_err());
    // Timing out dropped the call, which released its route
    assert_eq!(h.client.in_flight(), 0);
    assert_eq!(h.client_broker.unsubscribe_count("/nobody-home_res"), 1);
}
