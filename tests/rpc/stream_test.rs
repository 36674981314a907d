//! Streamed response tests.

use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::common::{eventually, within, Harness};
use pubsub_rpc::server::{stream_fn, HandlerOutput};
use pubsub_rpc::{CodecKind, HandlerError, RpcError};

fn job_handler(steps: u64) -> pubsub_rpc::Handler {
    stream_fn(move |_, job: Value| {
        stream::iter(1..=steps).then(move |step| {
            let job = job.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(step)).await;
                Ok::<_, HandlerError>(json!({"job": job, "step": step}))
            }
        })
    })
}

#[tokio::test]
async fn test_jobs_stream_yields_three_values_in_order() {
    for codec in [CodecKind::Identity, CodecKind::Json] {
        let h = Harness::new(codec);
        h.server.register("/jobs-stream1", job_handler(3)).unwrap();
        h.server.start().await.unwrap();

        let values = within(h.client.send("/jobs-stream1", json!(1)).collect())
            .await
            .unwrap();
        assert_eq!(
            values,
            vec![
                json!({"job": 1, "step": 1}),
                json!({"job": 1, "step": 2}),
                json!({"job": 1, "step": 3}),
            ]
        );
    }
}

#[tokio::test]
async fn test_empty_stream_completes_without_values() {
    let h = Harness::new(CodecKind::Identity);
    h.server
        .add_request_handler("/nothing", EmptyHandler)
        .unwrap();
    h.server.start().await.unwrap();

    let values = within(h.client.send("/nothing", Value::Null).collect())
        .await
        .unwrap();
    assert!(values.is_empty());
}

struct EmptyHandler;

#[async_trait::async_trait]
impl pubsub_rpc::server::RequestHandler for EmptyHandler {
    async fn handle(
        &self,
        _ctx: pubsub_rpc::RequestContext,
        _data: Value,
    ) -> Result<HandlerOutput, HandlerError> {
        Ok(HandlerOutput::empty())
    }
}

#[tokio::test]
async fn test_error_after_values_delivers_values_then_error() {
    let h = Harness::new(CodecKind::Identity);
    h.server
        .register(
            "/partial",
            stream_fn(|_, _| {
                stream::iter(vec![
                    Ok(json!("first")),
                    Ok(json!("second")),
                    Err(HandlerError::with_payload(json!({"code": 500}))),
                ])
            }),
        )
        .unwrap();
    h.server.start().await.unwrap();

    let items: Vec<_> = within(h.client.send("/partial", Value::Null).stream().collect()).await;
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_ref().unwrap(), &json!("first"));
    assert_eq!(items[1].as_ref().unwrap(), &json!("second"));
    assert!(matches!(&items[2], Err(RpcError::Remote(p)) if p == &json!({"code": 500})));
}

#[tokio::test]
async fn test_cancel_mid_stream_releases_subscription() {
    let h = Harness::new(CodecKind::Identity);
    let steps = Arc::new(Semaphore::new(1));
    let gate = steps.clone();
    h.server
        .register(
            "/ticks",
            stream_fn(move |_, _| {
                let gate = gate.clone();
                stream::iter(1..=10u64).then(move |n| {
                    let gate = gate.clone();
                    async move {
                        gate.acquire()
                            .await
                            .map_err(|e| HandlerError::new(e.to_string()))?
                            .forget();
                        Ok::<_, HandlerError>(json!(n))
                    }
                })
            }),
        )
        .unwrap();
    h.server.start().await.unwrap();

    let mut ticks = h.client.send("/ticks", Value::Null).stream();
    // One permit: the server can publish tick 1 only once tick 2 is also produced
    steps.add_permits(1);
    assert_eq!(within(ticks.next()).await.unwrap().unwrap(), json!(1));

    drop(ticks);
    assert_eq!(h.client.in_flight(), 0);
    assert_eq!(h.client_broker.unsubscribe_count("/ticks_res"), 1);

    // The server keeps producing; nobody is listening any more
    steps.add_permits(8);
    tokio::time::sleep(Duration::from_millis(50)).await;
    eventually(|| h.hub.subscriber_count("/ticks_res") == 0).await;
}

#[tokio::test]
async fn test_null_values_are_delivered() {
    for codec in [CodecKind::Identity, CodecKind::Json] {
        let h = Harness::new(codec);
        h.server
            .register(
                "/nothing-found",
                pubsub_rpc::request_fn(|_, _| async { Ok::<_, HandlerError>(Value::Null) }),
            )
            .unwrap();
        h.server
            .register(
                "/sparse",
                stream_fn(|_, _| {
                    stream::iter(vec![Ok::<_, HandlerError>(json!(1)), Ok(Value::Null), Ok(json!(3))])
                }),
            )
            .unwrap();
        h.server.start().await.unwrap();

        let single = h.client.send("/nothing-found", json!({}));
        let single = within(single.collect()).await.unwrap();
        assert_eq!(single, vec![Value::Null]);

        let streamed = h.client.send("/sparse", json!({}));
        let streamed = within(streamed.collect()).await.unwrap();
        assert_eq!(streamed, vec![json!(1), Value::Null, json!(3)]);
    }
}
