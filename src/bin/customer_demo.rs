//! pubsub-rpc-demo: Customer service and requester
//!
//! Runs a customer service and a requesting app against one in-memory
//! broker hub, exercising every interaction style:
//! - `/add-customer`: event, appends to the customer list
//! - `/get-customers`: request, single reply (optional `customerId` filter)
//! - `/jobs-stream1`: request, one reply per completed job step
//!
//! ## Architecture
//! ```text
//! [requester] --(/x_ack, /x)--> [MemoryHub] --> [customer service]
//!      ^                                              |
//!      +---------------(/x_res)-----------------------+
//! ```
//!
//! ## Configuration
//! - PUBSUB_RPC_CONFIG: Path to a YAML config file (optional)
//! - PUBSUB_RPC__CODEC: `identity` or `json`
//! - PUBSUB_RPC__DEMO__STEP_MILLIS / PUBSUB_RPC__DEMO__STEPS: job shape
//! - PUBSUB_RPC_LOG: tracing filter (default: info)
//! - PUBSUB_RPC__LOGGING__FORMAT: `text` or `json`

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use pubsub_rpc::broker::MemoryHub;
use pubsub_rpc::config::{Config, DemoConfig};
use pubsub_rpc::server::{
    stream_fn, EventHandler, HandlerError, HandlerOutput, RequestContext, RequestHandler,
};
use pubsub_rpc::utils::bootstrap::init_tracing;
use pubsub_rpc::{RpcClient, RpcServer};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Customer {
    id: u64,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomerQuery {
    customer_id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct NewCustomer {
    name: String,
}

/// In-memory customer list shared by the service's handlers.
#[derive(Clone)]
struct CustomerStore {
    customers: Arc<Mutex<Vec<Customer>>>,
}

impl CustomerStore {
    fn seeded() -> Self {
        Self {
            customers: Arc::new(Mutex::new(vec![Customer {
                id: 1,
                name: "Acme, Inc.".to_string(),
            }])),
        }
    }

    fn find(&self, id: Option<u64>) -> Vec<Customer> {
        let customers = self.customers.lock().unwrap_or_else(PoisonError::into_inner);
        customers
            .iter()
            .filter(|c| id.map_or(true, |id| c.id == id))
            .cloned()
            .collect()
    }

    fn add(&self, name: String) -> Customer {
        let mut customers = self.customers.lock().unwrap_or_else(PoisonError::into_inner);
        let customer = Customer {
            id: customers.len() as u64 + 1,
            name,
        };
        customers.push(customer.clone());
        customer
    }
}

/// Accepts `customerId` as a number or a numeric string.
fn parse_customer_id(raw: &Value) -> Result<u64, HandlerError> {
    match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| HandlerError::new(format!("Invalid customerId: {}", raw)))
}

struct GetCustomers(CustomerStore);

#[async_trait]
impl RequestHandler for GetCustomers {
    async fn handle(&self, ctx: RequestContext, data: Value) -> Result<HandlerOutput, HandlerError> {
        let query: CustomerQuery = if data.is_null() {
            CustomerQuery::default()
        } else {
            serde_json::from_value(data)?
        };
        let id = query.customer_id.as_ref().map(parse_customer_id).transpose()?;

        let customers = self.0.find(id);
        info!(id = ?ctx.id, matched = customers.len(), "Serving get-customers");
        Ok(json!({ "customers": customers }).into())
    }
}

struct AddCustomer(CustomerStore);

#[async_trait]
impl EventHandler for AddCustomer {
    async fn handle(&self, _ctx: RequestContext, data: Value) -> Result<(), HandlerError> {
        let new: NewCustomer = serde_json::from_value(data)?;
        let customer = self.0.add(new.name);
        info!(id = customer.id, name = %customer.name, "Customer added");
        Ok(())
    }
}

/// Simulated multi-step job. Step `n` takes `n` base durations.
fn job_steps(job: Value, demo: &DemoConfig) -> impl futures::Stream<Item = Result<Value, HandlerError>> {
    let base = demo.step_millis;
    stream::iter(1..=u64::from(demo.steps)).then(move |step| {
        let job = job.clone();
        async move {
            let work_millis = step * base;
            tokio::time::sleep(Duration::from_millis(work_millis)).await;
            Ok::<_, HandlerError>(json!({
                "job": job,
                "step": step,
                "status": format!("Step {} complete after {} ms", step, work_millis),
                "workTime": work_millis,
            }))
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(None)?;
    init_tracing(config.logging.format);

    info!(codec = ?config.codec, broker = %config.broker.url, "pubsub-rpc-demo starting");

    let hub = MemoryHub::new();

    // Customer service
    let store = CustomerStore::seeded();
    let server = RpcServer::new(Arc::new(hub.connection()), config.codec.build());
    server.add_request_handler("/get-customers", GetCustomers(store.clone()))?;
    server.add_event_handler("/add-customer", AddCustomer(store))?;
    let demo = config.demo.clone();
    server.register(
        "/jobs-stream1",
        stream_fn(move |_, data| job_steps(data, &demo)),
    )?;
    server.start().await?;

    // Requesting app
    let client = RpcClient::new(Arc::new(hub.connection()), config.codec.build());

    client
        .emit("/add-customer", json!({ "name": "Globex Corporation" }))
        .await?;
    info!("Published add-customer event");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let all = client
        .send("/get-customers", json!({}))
        .last()
        .await?
        .unwrap_or(Value::Null);
    info!(response = %all, "All customers");

    let one = client
        .send("/get-customers", json!({ "customerId": "2" }))
        .last()
        .await?
        .unwrap_or(Value::Null);
    info!(response = %one, "Customer 2");

    let mut steps = client.send("/jobs-stream1", json!(1)).stream();
    while let Some(step) = steps.next().await {
        let step = step?;
        info!(step = %step, "Job progress");
    }
    info!("Job complete");

    if let Err(e) = client.send("/get-customers", json!({ "customerId": "x" })).last().await {
        info!(error = %e, "Rejected request");
    }

    client.close().await;
    server.stop().await?;
    info!("pubsub-rpc-demo finished");
    Ok(())
}
