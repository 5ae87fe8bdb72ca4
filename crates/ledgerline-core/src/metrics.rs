//! Operational signal names and a duration timer over the `metrics` facade.
//!
//! Nothing here installs a recorder; without one every call is a no-op.

use std::time::Instant;

/// Histogram: seconds spent inside a database `COMMIT`.
pub const DB_COMMIT_DURATION: &str = "db_commit_duration_seconds";

/// Histogram: seconds spent handling one block revert, success or failure.
pub const BLOCKS_REVERT_DURATION: &str = "blocks_revert_duration_seconds";

/// Counter: reverts detected.
pub const BLOCKS_REVERT_DETECTED: &str = "blocks_revert_detected_total";

/// Counter: duplicate RPC requests issued after the quick timeout.
pub const RPC_HEDGED_REQUESTS: &str = "rpc_hedged_requests_total";

/// Histogram: seconds spent in one chain read, labelled by `function`.
pub const BLOCKCHAIN_RPC_CALL_DURATION: &str = "blockchain_rpc_call_duration_seconds";

/// Records the time between its creation and [`DurationTimer::stop`] into a
/// histogram.
#[derive(Debug)]
pub struct DurationTimer {
    name: &'static str,
    started: Instant,
}

impl DurationTimer {
    pub fn start(name: &'static str) -> Self {
        Self { name, started: Instant::now() }
    }

    /// Record the elapsed time with a `status` label.
    pub fn stop_with_status(self, status: &'static str) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        metrics::histogram!(self.name, "status" => status).record(secs);
        secs
    }

    /// Record the elapsed time with a `function` label.
    pub fn stop_with_function(self, function: &'static str) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        metrics::histogram!(self.name, "function" => function).record(secs);
        secs
    }

    /// Record the elapsed time without labels.
    pub fn stop(self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        metrics::histogram!(self.name).record(secs);
        secs
    }
}
