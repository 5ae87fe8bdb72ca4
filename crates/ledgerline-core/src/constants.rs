//! Reference timings and sizes. All durations in milliseconds.

/// Interval between heartbeat pings on an open socket.
pub const HEARTBEAT_CHECK_INTERVAL_MS: u64 = 7_000;

/// How long a ping may stay unanswered before the socket is terminated.
pub const HEARTBEAT_EXPECTED_PONG_BACK_MS: u64 = 15_000;

/// Number of sockets held by the connection pool.
pub const DEFAULT_WS_POOL_SIZE: usize = 5;

/// Tick of the pool's dead-slot replacement loop.
pub const POOL_RECONCILE_INTERVAL_MS: u64 = 10_000;

/// Soft deadline after which a duplicate RPC request is issued.
pub const RPC_QUICK_TIMEOUT_MS: u64 = 10_000;

/// Hard deadline of a single HTTP RPC attempt.
pub const RPC_REQUEST_TIMEOUT_MS: u64 = 20_000;

/// Records folded into counters per database transaction.
pub const COUNTERS_RECORDS_BATCH_SIZE: u64 = 20_000;

/// Pause of a counter worker after a partial batch.
pub const COUNTERS_UPDATE_INTERVAL_MS: u64 = 30_000;

/// Pause before re-issuing a chain read that failed on the network.
pub const RPC_CALL_QUICK_RETRY_TIMEOUT_MS: u64 = 500;

/// Pause before re-issuing a chain read that the node rejected.
pub const RPC_CALL_DEFAULT_RETRY_TIMEOUT_MS: u64 = 30_000;

/// Poll interval of the revert watcher.
pub const REVERT_WATCH_INTERVAL_MS: u64 = 1_000;

/// Maximum pooled database connections.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

/// JSON-RPC protocol version tag.
pub const JSONRPC_VERSION: &str = "2.0";
