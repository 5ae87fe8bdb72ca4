//! Trait interfaces between crates.
//!
//! - [`ConnectionStatus`]: lifecycle view shared by every transport variant
//! - [`RpcTransport`]: one request/response chain RPC call (ledgerline-rpc implements)
//! - [`ChainSource`]: the upstream chain as seen by the reorg reconciler

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RpcError;
use crate::types::ConnectionState;

/// Anything that can report where it is in the connection lifecycle.
///
/// Implemented by otherwise unrelated transports (HTTP client, streaming
/// socket, socket pool).
pub trait ConnectionStatus {
    fn state(&self) -> ConnectionState;
}

/// A request/response chain RPC call.
///
/// The transport never rewrites the payload; `params` is forwarded as the
/// positional parameter list.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn send(&self, method: &str, params: &[Value]) -> Result<Value, RpcError>;
}

#[async_trait]
impl<T: RpcTransport + ?Sized> RpcTransport for Arc<T> {
    async fn send(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        (**self).send(method, params).await
    }
}

/// Read access to the canonical upstream chain.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Hash of the canonical block at `number`, `None` if the node does not
    /// know that height.
    async fn block_hash(&self, number: u64) -> Result<Option<String>, RpcError>;

    /// Height of the node's current head.
    async fn latest_block_number(&self) -> Result<u64, RpcError>;
}

#[async_trait]
impl<T: ChainSource + ?Sized> ChainSource for Arc<T> {
    async fn block_hash(&self, number: u64) -> Result<Option<String>, RpcError> {
        (**self).block_hash(number).await
    }

    async fn latest_block_number(&self) -> Result<u64, RpcError> {
        (**self).latest_block_number().await
    }
}
