//! Fire-and-forget event tests.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::common::{eventually, within, Harness};
use pubsub_rpc::server::{event_fn, request_fn};
use pubsub_rpc::{CodecKind, HandlerError};

#[tokio::test]
async fn test_add_customer_event_updates_service_state() {
    let h = Harness::new(CodecKind::Json);
    let customers = Arc::new(Mutex::new(vec![json!({"id": 1, "name": "Acme, Inc."})]));

    let store = customers.clone();
    h.server
        .register(
            "/add-customer",
            event_fn(move |_, data: Value| {
                let store = store.clone();
                async move {
                    let name = data
                        .get("name")
                        .cloned()
                        .ok_or_else(|| HandlerError::from("missing name"))?;
                    let mut store = store.lock().unwrap();
                    let id = store.len() + 1;
                    store.push(json!({"id": id, "name": name}));
                    Ok::<_, HandlerError>(())
                }
            }),
        )
        .unwrap();
    let store = customers.clone();
    h.server
        .register(
            "/get-customers",
            request_fn(move |_, _| {
                let store = store.clone();
                async move {
                    let all = store.lock().unwrap().clone();
                    Ok::<_, HandlerError>(json!({ "customers": all }))
                }
            }),
        )
        .unwrap();
    h.server.start().await.unwrap();

    h.client
        .emit("/add-customer", json!({"name": "Globex"}))
        .await
        .unwrap();
    eventually(|| customers.lock().unwrap().len() == 2).await;

    let value = within(h.client.send("/get-customers", json!({})).last())
        .await
        .unwrap();
    assert_eq!(
        value,
        Some(json!({"customers": [
            {"id": 1, "name": "Acme, Inc."},
            {"id": 2, "name": "Globex"},
        ]}))
    );
}

#[tokio::test]
async fn test_emit_never_subscribes_response_channel() {
    let h = Harness::new(CodecKind::Identity);

    h.client.emit("/add-customer", json!({"name": "Initech"})).await.unwrap();
    h.client.emit("/add-customer", json!({"name": "Hooli"})).await.unwrap();

    assert_eq!(h.client_broker.publish_count("/add-customer"), 2);
    assert_eq!(h.client_broker.subscribe_count("/add-customer_res"), 0);
    assert_eq!(h.client.subscriber_count("/add-customer_res"), 0);
    assert_eq!(h.client.in_flight(), 0);
}

#[tokio::test]
async fn test_emit_resolves_without_listeners() {
    let h = Harness::new(CodecKind::Identity);
    within(h.client.emit("/nobody-listens", Value::Null))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_request_to_event_pattern_is_not_dispatched() {
    let h = Harness::new(CodecKind::Identity);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    h.server
        .register(
            "/audit",
            event_fn(move |_, data| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(data);
                    Ok::<_, HandlerError>(())
                }
            }),
        )
        .unwrap();
    h.server.start().await.unwrap();

    // A request goes to /audit_ack, which no handler listens on
    let result = tokio::time::timeout(
        std::time::Duration::from_millis(100),
        h.client.send("/audit", json!("request")).last(),
    )
    .await;
    assert!(result.is_err());

    h.client.emit("/audit", json!("event")).await.unwrap();
    eventually(|| seen.lock().unwrap().len() == 1).await;
    assert_eq!(seen.lock().unwrap()[0], json!("event"));
}
