//! Chain reads that never give up.
//!
//! A failed read is logged, the caller waits, and the read is issued again.
//! Network failures and timeouts wait [`RetryConfig::quick_retry`]; anything
//! the node itself rejected waits [`RetryConfig::default_retry`]. Every
//! successful read records its duration under
//! [`BLOCKCHAIN_RPC_CALL_DURATION`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::error;

use ledgerline_core::error::RpcError;
use ledgerline_core::metrics::{BLOCKCHAIN_RPC_CALL_DURATION, DurationTimer};
use ledgerline_core::traits::ChainSource;

use crate::config::RetryConfig;

/// Wraps a [`ChainSource`] so that its reads only ever return success.
#[derive(Debug, Clone)]
pub struct RetryingChain<C> {
    inner: C,
    config: RetryConfig,
}

impl<C: ChainSource> RetryingChain<C> {
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn pause_after(&self, error: &RpcError) -> Duration {
        if error.is_transient() {
            self.config.quick_retry
        } else {
            self.config.default_retry
        }
    }

    async fn call<T, F, Fut>(&self, function: &'static str, action: F) -> T
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        loop {
            let timer = DurationTimer::start(BLOCKCHAIN_RPC_CALL_DURATION);
            match action().await {
                Ok(value) => {
                    timer.stop_with_function(function);
                    return value;
                }
                Err(e) => {
                    let pause = self.pause_after(&e);
                    error!(function, error = %e, retry_in = ?pause, "chain read failed");
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }
}

#[async_trait]
impl<C: ChainSource> ChainSource for RetryingChain<C> {
    async fn block_hash(&self, number: u64) -> Result<Option<String>, RpcError> {
        Ok(self.call("getBlock", || self.inner.block_hash(number)).await)
    }

    async fn latest_block_number(&self) -> Result<u64, RpcError> {
        Ok(self.call("getBlockNumber", || self.inner.latest_block_number()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    /// Hands out scripted head heights, then a fixed height forever.
    struct Scripted {
        heads: Mutex<VecDeque<Result<u64, RpcError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(heads: Vec<Result<u64, RpcError>>) -> Self {
            Self { heads: Mutex::new(heads.into()), calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl ChainSource for Scripted {
        async fn block_hash(&self, number: u64) -> Result<Option<String>, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.heads.lock().pop_front() {
                Some(Err(e)) => Err(e),
                _ => Ok((number < 10).then(|| format!("0x{number:x}"))),
            }
        }

        async fn latest_block_number(&self) -> Result<u64, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.heads.lock().pop_front().unwrap_or(Ok(100))
        }
    }

    fn rejected() -> RpcError {
        RpcError::Rpc { code: -32000, message: "header not found".into(), data: None }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_retried_after_quick_pause() {
        let chain = RetryingChain::new(Scripted::new(vec![Err(RpcError::Timeout), Ok(42)]), RetryConfig::default());
        let started = Instant::now();
        assert_eq!(chain.latest_block_number().await.unwrap(), 42);
        assert_eq!(started.elapsed(), Duration::from_millis(500));
        assert_eq!(chain.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn node_rejection_is_retried_after_default_pause() {
        let chain = RetryingChain::new(Scripted::new(vec![Err(rejected()), Ok(42)]), RetryConfig::default());
        let started = Instant::now();
        assert_eq!(chain.latest_block_number().await.unwrap(), 42);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_accumulate_until_success() {
        let script = vec![
            Err(RpcError::ConnectionClosed),
            Err(RpcError::Decode("bad quantity".into())),
            Err(RpcError::Transport("reset".into())),
            Ok(7),
        ];
        let chain = RetryingChain::new(Scripted::new(script), RetryConfig::default());
        let started = Instant::now();
        assert_eq!(chain.latest_block_number().await.unwrap(), 7);
        assert_eq!(started.elapsed(), Duration::from_millis(500 + 30_000 + 500));
        assert_eq!(chain.inner().calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_block_is_not_retried() {
        let chain = RetryingChain::new(Scripted::new(vec![Err(RpcError::Timeout)]), RetryConfig::default());
        let started = Instant::now();
        assert_eq!(chain.block_hash(3).await.unwrap().as_deref(), Some("0x3"));
        assert_eq!(chain.block_hash(50).await.unwrap(), None);
        assert_eq!(started.elapsed(), Duration::from_millis(500));
        assert_eq!(chain.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn configured_pauses_are_used() {
        let config = RetryConfig { quick_retry: Duration::from_secs(2), default_retry: Duration::from_secs(5) };
        let chain = RetryingChain::new(Scripted::new(vec![Err(RpcError::Timeout), Err(rejected()), Ok(1)]), config);
        let started = Instant::now();
        chain.latest_block_number().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }
}
