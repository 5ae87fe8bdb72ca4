//! Request hedging for request/response transports.
//!
//! Each call is sent once. If it has not settled within `quick_timeout`, an
//! identical second call is sent and its outcome becomes the result. The
//! first call is left running in the background, and whatever it eventually
//! produces is discarded. Nothing is retried beyond that single duplicate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use ledgerline_core::error::RpcError;
use ledgerline_core::metrics::RPC_HEDGED_REQUESTS;
use ledgerline_core::traits::{ChainSource, ConnectionStatus, RpcTransport};
use ledgerline_core::types::ConnectionState;

use crate::chain;
use crate::config::HedgeConfig;

/// Wraps a transport so that slow calls get a second chance.
#[derive(Debug)]
pub struct HedgedClient<T> {
    inner: Arc<T>,
    quick_timeout: Duration,
}

impl<T> Clone for HedgedClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            quick_timeout: self.quick_timeout,
        }
    }
}

impl<T: RpcTransport + 'static> HedgedClient<T> {
    pub fn new(inner: T, config: HedgeConfig) -> Self {
        Self {
            inner: Arc::new(inner),
            quick_timeout: config.quick_timeout,
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn quick_timeout(&self) -> Duration {
        self.quick_timeout
    }
}

#[async_trait]
impl<T: RpcTransport + 'static> RpcTransport for HedgedClient<T> {
    async fn send(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        let inner = Arc::clone(&self.inner);
        let owned_method = method.to_string();
        let owned_params = params.to_vec();
        // Spawned so the first attempt keeps running after we stop waiting for it.
        let mut primary =
            tokio::spawn(async move { inner.send(&owned_method, &owned_params).await });

        let quick = tokio::time::sleep(self.quick_timeout);
        tokio::pin!(quick);

        tokio::select! {
            biased;
            joined = &mut primary => {
                return joined.unwrap_or_else(|e| Err(RpcError::Transport(e.to_string())));
            }
            _ = &mut quick => {}
        }

        counter!(RPC_HEDGED_REQUESTS).increment(1);
        warn!(method, quick_timeout = ?self.quick_timeout, "request is slow, sending hedge");
        let outcome = self.inner.send(method, params).await;
        if let Err(e) = &outcome {
            debug!(method, error = %e, "hedged request failed");
        }
        outcome
    }
}

impl<T> ConnectionStatus for HedgedClient<T> {
    /// Request/response transports hold no persistent connection.
    fn state(&self) -> ConnectionState {
        ConnectionState::Open
    }
}

#[async_trait]
impl<T: RpcTransport + 'static> ChainSource for HedgedClient<T> {
    async fn block_hash(&self, number: u64) -> Result<Option<String>, RpcError> {
        chain::fetch_block_hash(self, number).await
    }

    async fn latest_block_number(&self) -> Result<u64, RpcError> {
        chain::fetch_latest_block_number(self).await
    }
}
