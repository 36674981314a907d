//! Bootstrap utilities for pubsub-rpc binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogFormat, LOG_ENV_VAR};

/// Initialize tracing with the `PUBSUB_RPC_LOG` environment variable.
///
/// Defaults to "info" level if `PUBSUB_RPC_LOG` is not set. `LogFormat::Json`
/// emits one JSON object per event for log collectors.
pub fn init_tracing(format: LogFormat) {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer(format))
        .init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn fmt_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    match format {
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
    }
}
