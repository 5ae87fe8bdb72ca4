//! Worker configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `LEDGERLINE_*` environment variables (e.g. `LEDGERLINE_WS_POOL_SIZE=8`).

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use ledgerline_core::constants::{
    COUNTERS_RECORDS_BATCH_SIZE, COUNTERS_UPDATE_INTERVAL_MS, DEFAULT_DB_MAX_CONNECTIONS,
    DEFAULT_WS_POOL_SIZE, HEARTBEAT_CHECK_INTERVAL_MS, HEARTBEAT_EXPECTED_PONG_BACK_MS,
    POOL_RECONCILE_INTERVAL_MS, REVERT_WATCH_INTERVAL_MS, RPC_CALL_DEFAULT_RETRY_TIMEOUT_MS,
    RPC_CALL_QUICK_RETRY_TIMEOUT_MS, RPC_QUICK_TIMEOUT_MS, RPC_REQUEST_TIMEOUT_MS,
};
use ledgerline_rpc::{HedgeConfig, HeartbeatConfig, PoolConfig, RetryConfig};

use crate::error::ConfigError;

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "LEDGERLINE";

/// Configuration for a worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// HTTP JSON-RPC endpoint of the chain node.
    pub rpc_url: String,
    /// WebSocket endpoint of the chain node.
    pub ws_url: String,
    /// `sqlite:` or `postgres:` connection string.
    pub database_url: String,
    pub db_max_connections: u32,
    pub ws_pool_size: usize,
    pub pool_reconcile_interval_ms: u64,
    pub heartbeat_check_interval_ms: u64,
    pub heartbeat_expected_pong_back_ms: u64,
    pub rpc_quick_timeout_ms: u64,
    pub rpc_request_timeout_ms: u64,
    /// Pause before retrying a chain read that failed on the network.
    pub rpc_call_quick_retry_timeout_ms: u64,
    /// Pause before retrying a chain read the node rejected.
    pub rpc_call_default_retry_timeout_ms: u64,
    pub counters_records_batch_size: u64,
    pub counters_update_interval_ms: u64,
    pub disable_counters_processing: bool,
    pub revert_watch_interval_ms: u64,
    pub disable_blocks_revert: bool,
    /// Log level filter string (e.g. "info", "ledgerline_rpc=debug").
    pub log_level: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            ws_url: "ws://127.0.0.1:8546".to_string(),
            database_url: "sqlite://ledgerline.sqlite?mode=rwc".to_string(),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            ws_pool_size: DEFAULT_WS_POOL_SIZE,
            pool_reconcile_interval_ms: POOL_RECONCILE_INTERVAL_MS,
            heartbeat_check_interval_ms: HEARTBEAT_CHECK_INTERVAL_MS,
            heartbeat_expected_pong_back_ms: HEARTBEAT_EXPECTED_PONG_BACK_MS,
            rpc_quick_timeout_ms: RPC_QUICK_TIMEOUT_MS,
            rpc_request_timeout_ms: RPC_REQUEST_TIMEOUT_MS,
            rpc_call_quick_retry_timeout_ms: RPC_CALL_QUICK_RETRY_TIMEOUT_MS,
            rpc_call_default_retry_timeout_ms: RPC_CALL_DEFAULT_RETRY_TIMEOUT_MS,
            counters_records_batch_size: COUNTERS_RECORDS_BATCH_SIZE,
            counters_update_interval_ms: COUNTERS_UPDATE_INTERVAL_MS,
            disable_counters_processing: false,
            revert_watch_interval_ms: REVERT_WATCH_INTERVAL_MS,
            disable_blocks_revert: false,
            log_level: "info".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Load defaults, `file` (if given and present) and the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(file, Environment::with_prefix(ENV_PREFIX).try_parsing(true))
    }

    /// As [`load`](Self::load) with an explicit environment source.
    pub fn load_with_env(file: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(false));
        }
        let cfg: Self = builder.add_source(env).build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ws_pool_size == 0 {
            return Err(ConfigError::Invalid { field: "ws_pool_size", reason: "must be at least 1".into() });
        }
        if self.counters_records_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "counters_records_batch_size",
                reason: "must be at least 1".into(),
            });
        }
        if self.db_max_connections == 0 {
            return Err(ConfigError::Invalid { field: "db_max_connections", reason: "must be at least 1".into() });
        }
        Ok(())
    }

    pub fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            check_interval: Duration::from_millis(self.heartbeat_check_interval_ms),
            expected_pong_back: Duration::from_millis(self.heartbeat_expected_pong_back_ms),
        }
    }

    pub fn pool(&self) -> PoolConfig {
        PoolConfig {
            size: self.ws_pool_size,
            reconcile_interval: Duration::from_millis(self.pool_reconcile_interval_ms),
        }
    }

    pub fn hedge(&self) -> HedgeConfig {
        HedgeConfig { quick_timeout: Duration::from_millis(self.rpc_quick_timeout_ms) }
    }

    pub fn rpc_request_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_request_timeout_ms)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            quick_retry: Duration::from_millis(self.rpc_call_quick_retry_timeout_ms),
            default_retry: Duration::from_millis(self.rpc_call_default_retry_timeout_ms),
        }
    }

    pub fn counters_batch_size(&self) -> usize {
        usize::try_from(self.counters_records_batch_size).unwrap_or(usize::MAX)
    }

    pub fn counters_update_interval(&self) -> Duration {
        Duration::from_millis(self.counters_update_interval_ms)
    }

    pub fn revert_watch_interval(&self) -> Duration {
        Duration::from_millis(self.revert_watch_interval_ms)
    }
}
