use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::time::Duration;
use validator::Validate;

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;
const DEFAULT_OUTBOX_MAX_RETRIES: u32 = 3;
const DEFAULT_TXN_NUMBER_PREFIX: &str = "TXN";
const DEFAULT_ORDER_NUMBER_PREFIX: &str = "PO";

/// Core engine configuration.
///
/// Loaded from the environment with the `INVENTORY__` prefix (e.g.
/// `INVENTORY__LOCK_TIMEOUT_MS=2000`); every field has a production
/// default so `CoreConfig::default()` is valid for tests.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    /// Upper bound for acquiring a (product, warehouse) pair lock before
    /// the operation fails with `LockTimeout`.
    #[serde(default = "default_lock_timeout_ms")]
    #[validate(range(min = 1, max = 300_000))]
    pub lock_timeout_ms: u64,

    /// Capacity of the outbound event channel.
    #[serde(default = "default_event_buffer_size")]
    #[validate(range(min = 1))]
    pub event_buffer_size: usize,

    /// Send attempts per event before it is dropped with an error log.
    #[serde(default = "default_outbox_max_retries")]
    #[validate(range(min = 1, max = 100))]
    pub outbox_max_retries: u32,

    /// Prefix for generated transaction numbers ("TXN-2026-000123").
    #[serde(default = "default_txn_number_prefix")]
    #[validate(length(min = 1, max = 8))]
    pub transaction_number_prefix: String,

    /// Prefix for generated purchase order numbers ("PO-2026-000042").
    #[serde(default = "default_order_number_prefix")]
    #[validate(length(min = 1, max = 8))]
    pub order_number_prefix: String,
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

fn default_event_buffer_size() -> usize {
    DEFAULT_EVENT_BUFFER_SIZE
}

fn default_outbox_max_retries() -> u32 {
    DEFAULT_OUTBOX_MAX_RETRIES
}

fn default_txn_number_prefix() -> String {
    DEFAULT_TXN_NUMBER_PREFIX.to_string()
}

fn default_order_number_prefix() -> String {
    DEFAULT_ORDER_NUMBER_PREFIX.to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            event_buffer_size: default_event_buffer_size(),
            outbox_max_retries: default_outbox_max_retries(),
            transaction_number_prefix: default_txn_number_prefix(),
            order_number_prefix: default_order_number_prefix(),
        }
    }
}

impl CoreConfig {
    /// Loads configuration from the environment, falling back to defaults
    /// for anything unset.
    pub fn load() -> Result<Self, ConfigError> {
        let cfg: CoreConfig = Config::builder()
            .add_source(Environment::with_prefix("INVENTORY").separator("__"))
            .build()?
            .try_deserialize()?;
        cfg.validate()
            .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;
        Ok(cfg)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
