//! # ledgerline-core
//! Foundation types and traits shared by the Ledgerline crates.

pub mod constants;
pub mod error;
pub mod metrics;
pub mod traits;
pub mod types;

pub use error::{ChainError, RpcError};
pub use traits::{ChainSource, ConnectionStatus, RpcTransport};
pub use types::{BlockRecord, BlockStatus, ConnectionState, IsolationLevel};
