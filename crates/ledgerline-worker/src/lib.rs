//! # ledgerline-worker-lib — chain consistency for the Ledgerline worker.
//!
//! - [`revert::BlocksRevertService`]: finds the last canonical block and rolls local state back to it
//! - [`watcher::RevertWatcher`]: polls the local head against upstream and triggers reverts
//! - [`counter`]: precomputed row counters and their rewind on revert
//! - [`config::WorkerConfig`]: layered process configuration

pub mod config;
pub mod counter;
pub mod error;
pub mod revert;
pub mod watcher;

pub use config::WorkerConfig;
pub use counter::{CounterCriteria, CounterProcessor, CounterService};
pub use error::{ConfigError, RevertError};
pub use revert::BlocksRevertService;
pub use watcher::RevertWatcher;
