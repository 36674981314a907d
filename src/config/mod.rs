//! Application configuration.
//!
//! Loaded from YAML files and environment variables into a single `Config`.

use serde::Deserialize;

use crate::codec::CodecKind;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "pubsub-rpc.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "PUBSUB_RPC_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "PUBSUB_RPC";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "PUBSUB_RPC_LOG";

/// Default broker endpoint.
pub const DEFAULT_BROKER_URL: &str = "http://localhost:8000/faye";

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Packet encoding on the wire.
    pub codec: CodecKind,
    /// Broker connection.
    pub broker: BrokerConfig,
    /// Customer demo tuning.
    pub demo: DemoConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Log output settings. The level comes from `LOG_ENV_VAR`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker endpoint. Ignored by the in-memory broker.
    pub url: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BROKER_URL.to_string(),
        }
    }
}

/// Customer demo settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Delay between job steps, in milliseconds.
    pub step_millis: u64,
    /// Steps per streamed job.
    pub steps: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            step_millis: 200,
            steps: 3,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `DEFAULT_CONFIG_FILE` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
