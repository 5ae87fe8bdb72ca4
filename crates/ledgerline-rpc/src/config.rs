//! Timing and sizing knobs for the connectivity layer.

use std::time::Duration;

use ledgerline_core::constants::{
    DEFAULT_WS_POOL_SIZE, HEARTBEAT_CHECK_INTERVAL_MS, HEARTBEAT_EXPECTED_PONG_BACK_MS,
    POOL_RECONCILE_INTERVAL_MS, RPC_CALL_DEFAULT_RETRY_TIMEOUT_MS, RPC_CALL_QUICK_RETRY_TIMEOUT_MS,
    RPC_QUICK_TIMEOUT_MS,
};

/// Liveness checking of a single socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings once the socket is open.
    pub check_interval: Duration,
    /// Maximum time an unanswered ping may stay outstanding.
    pub expected_pong_back: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(HEARTBEAT_CHECK_INTERVAL_MS),
            expected_pong_back: Duration::from_millis(HEARTBEAT_EXPECTED_PONG_BACK_MS),
        }
    }
}

/// Size and healing cadence of the socket pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub size: usize,
    pub reconcile_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_WS_POOL_SIZE,
            reconcile_interval: Duration::from_millis(POOL_RECONCILE_INTERVAL_MS),
        }
    }
}

/// When to fire the duplicate request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HedgeConfig {
    pub quick_timeout: Duration,
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self {
            quick_timeout: Duration::from_millis(RPC_QUICK_TIMEOUT_MS),
        }
    }
}

/// Pauses between attempts of a retried chain read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// After a network failure or timeout.
    pub quick_retry: Duration,
    /// After any other failure.
    pub default_retry: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            quick_retry: Duration::from_millis(RPC_CALL_QUICK_RETRY_TIMEOUT_MS),
            default_retry: Duration::from_millis(RPC_CALL_DEFAULT_RETRY_TIMEOUT_MS),
        }
    }
}
