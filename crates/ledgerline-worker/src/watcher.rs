//! Background reorg detection.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use ledgerline_core::traits::ChainSource;

use crate::error::RevertError;
use crate::revert::BlocksRevertService;

/// Compares the newest local block with upstream on every tick and starts a
/// revert when they disagree.
pub struct RevertWatcher<C> {
    service: Arc<BlocksRevertService<C>>,
    interval: Duration,
}

impl<C: ChainSource + 'static> RevertWatcher<C> {
    pub fn new(service: Arc<BlocksRevertService<C>>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// One check. Returns the last correct block when a revert ran.
    ///
    /// A block upstream does not know yet is not treated as a reorg.
    pub async fn tick(&self) -> Result<Option<u64>, RevertError> {
        let Some(latest) = self.service.blocks().latest_block().await? else {
            return Ok(None);
        };
        let Some(upstream_hash) = self.service.chain().block_hash(latest.number).await? else {
            debug!(block_number = latest.number, "upstream has not reached local head yet");
            return Ok(None);
        };
        if upstream_hash == latest.hash {
            return Ok(None);
        }
        warn!(
            block_number = latest.number,
            local_hash = %latest.hash,
            upstream_hash = %upstream_hash,
            "local head is not canonical"
        );
        self.service.handle_revert(latest.number).await.map(Some)
    }

    /// Run [`tick`](Self::tick) every interval until the task is aborted.
    /// Failures are logged and retried on the next tick.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.interval, "revert watcher started");
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.tick().await {
                    warn!(error = %e, "revert check failed, retrying next tick");
                }
            }
        })
    }
}
