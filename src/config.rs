use serde::Deserialize;
use std::time::Duration;

use crate::utils::RedeliveryPolicy;
use crate::workflow::WorkflowSettings;

// ============================================================================
// Configuration
// ============================================================================
//
// Sources, later ones override earlier ones:
// 1. Built-in defaults (the Default impls below)
// 2. config/order_saga.toml, if present
// 3. The file named by ORDER_SAGA_CONFIG, if set
// 4. ORDER_SAGA__<SECTION>__<KEY> environment variables
//
// ============================================================================

pub const CONFIG_ENV_PREFIX: &str = "ORDER_SAGA";
pub const CONFIG_ENV_VAR: &str = "ORDER_SAGA_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "config/order_saga";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// In-process bus, simulated gateway and carrier
    Local,
    /// Events travel through Redpanda
    Redpanda,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Scylla,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: RunMode,
    pub store: StoreBackend,
    pub redpanda: RedpandaSettings,
    pub scylla: ScyllaSettings,
    pub metrics: MetricsSettings,
    pub workflow: WorkflowSection,
    pub redelivery: RedeliverySection,
    pub simulation: SimulationSettings,
    pub demo: DemoSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Local,
            store: StoreBackend::Memory,
            redpanda: RedpandaSettings::default(),
            scylla: ScyllaSettings::default(),
            metrics: MetricsSettings::default(),
            workflow: WorkflowSection::default(),
            redelivery: RedeliverySection::default(),
            simulation: SimulationSettings::default(),
            demo: DemoSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedpandaSettings {
    pub brokers: String,
    pub group_id: String,
    pub message_timeout_ms: u64,
    pub breaker_trip_after: u32,
    pub breaker_open_secs: u64,
}

impl Default for RedpandaSettings {
    fn default() -> Self {
        Self {
            brokers: "127.0.0.1:9092".to_string(),
            group_id: "order-saga".to_string(),
            message_timeout_ms: 5_000,
            breaker_trip_after: 5,
            breaker_open_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScyllaSettings {
    pub known_node: String,
    pub keyspace: String,
    pub replication_factor: u32,
}

impl Default for ScyllaSettings {
    fn default() -> Self {
        Self {
            known_node: "127.0.0.1:9042".to_string(),
            keyspace: "order_saga".to_string(),
            replication_factor: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    pub call_timeout_ms: u64,
    pub low_stock_threshold: u64,
    pub alerts_recipient: String,
    /// Per-subscriber live notification buffer
    pub notification_buffer: usize,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5_000,
            low_stock_threshold: 5,
            alerts_recipient: "operations".to_string(),
            notification_buffer: 64,
        }
    }
}

impl WorkflowSection {
    pub fn settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            low_stock_threshold: self.low_stock_threshold,
            operations_recipient: self.alerts_recipient.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedeliverySection {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RedeliverySection {
    fn default() -> Self {
        let policy = RedeliveryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

impl RedeliverySection {
    pub fn policy(&self) -> RedeliveryPolicy {
        RedeliveryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            ..RedeliveryPolicy::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StockSeed {
    pub product_id: String,
    pub name: String,
    pub quantity: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Payments above this amount are declined; unset approves everything
    pub decline_above: Option<u64>,
    pub report_delivery: bool,
    pub seed_stock: Vec<StockSeed>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            decline_above: None,
            report_delivery: true,
            seed_stock: vec![
                StockSeed {
                    product_id: "P1".to_string(),
                    name: "Mechanical keyboard".to_string(),
                    quantity: 20,
                },
                StockSeed {
                    product_id: "P2".to_string(),
                    name: "Wireless mouse".to_string(),
                    quantity: 3,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    /// Submit a handful of sample orders at startup
    pub enabled: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        use ::config::{Config, Environment, File};

        let mut builder = Config::builder().add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false));

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::with_name(&path).required(true));
        }

        let config: AppConfig = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;

        tracing::debug!(
            mode = ?config.mode,
            store = ?config.store,
            metrics_port = config.metrics.port,
            "Configuration loaded"
        );

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workflow.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid("workflow.call_timeout_ms must be positive".into()));
        }
        if self.workflow.notification_buffer == 0 {
            return Err(ConfigError::Invalid("workflow.notification_buffer must be positive".into()));
        }
        if self.redelivery.max_attempts == 0 {
            return Err(ConfigError::Invalid("redelivery.max_attempts must be at least 1".into()));
        }
        if self.mode == RunMode::Redpanda && self.redpanda.brokers.trim().is_empty() {
            return Err(ConfigError::Invalid("redpanda.brokers is required in redpanda mode".into()));
        }
        if self.store == StoreBackend::Scylla && self.scylla.keyspace.trim().is_empty() {
            return Err(ConfigError::Invalid("scylla.keyspace is required for the scylla store".into()));
        }
        Ok(())
    }
}
