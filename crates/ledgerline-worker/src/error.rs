//! Worker error types.
use thiserror::Error;

use ledgerline_core::error::RpcError;
use ledgerline_db::DbError;

/// Why a revert could not be completed.
#[derive(Error, Debug)]
pub enum RevertError {
    #[error("rpc: {0}")] Rpc(#[from] RpcError),
    #[error("database: {0}")] Db(#[from] DbError),
    #[error("block {detected} is at or below the last executed block {floor}")]
    IncorrectBlockIsFinalized { detected: u64, floor: u64 },
    #[error("genesis block differs from upstream, no block to revert to")]
    GenesisMismatch,
}

/// Worker configuration could not be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config: {0}")] Load(#[from] config::ConfigError),
    #[error("invalid value for {field}: {reason}")] Invalid { field: &'static str, reason: String },
}
