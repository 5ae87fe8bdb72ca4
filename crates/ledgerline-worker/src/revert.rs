//! Reorg reconciliation.
//!
//! When a locally stored block turns out not to be on the canonical chain,
//! [`BlocksRevertService::handle_revert`] finds the last block that still
//! matches upstream and rolls local state back to it: counters are rewound
//! and every later block is deleted (dependent rows go by cascade), all in
//! one transaction.

use metrics::counter;
use tracing::{debug, error, info};

use ledgerline_core::metrics::{BLOCKS_REVERT_DETECTED, BLOCKS_REVERT_DURATION, DurationTimer};
use ledgerline_core::traits::ChainSource;
use ledgerline_db::repository::BlockRepository;
use ledgerline_db::{TransactionOptions, UnitOfWork};

use crate::counter::CounterService;
use crate::error::RevertError;

pub struct BlocksRevertService<C> {
    chain: C,
    uow: UnitOfWork,
    blocks: BlockRepository,
    counters: CounterService,
}

impl<C: ChainSource> BlocksRevertService<C> {
    pub fn new(chain: C, uow: UnitOfWork, counters: CounterService) -> Self {
        Self { chain, blocks: BlockRepository::new(uow.clone()), uow, counters }
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn blocks(&self) -> &BlockRepository {
        &self.blocks
    }

    /// Revert local state below `detected_incorrect_block_number`.
    ///
    /// Returns the last correct block number. Failures are logged with the
    /// attempted target and returned; nothing is retried here.
    pub async fn handle_revert(&self, detected_incorrect_block_number: u64) -> Result<u64, RevertError> {
        counter!(BLOCKS_REVERT_DETECTED).increment(1);
        let timer = DurationTimer::start(BLOCKS_REVERT_DURATION);
        info!(detected_incorrect_block_number, "blocks revert detected");

        let outcome = self.revert(detected_incorrect_block_number).await;
        match &outcome {
            Ok(last_correct_block_number) => {
                let secs = timer.stop_with_status("success");
                info!(last_correct_block_number, duration_secs = secs, "blocks reverted");
            }
            Err(e) => {
                timer.stop_with_status("failure");
                error!(detected_incorrect_block_number, error = %e, "failed to revert blocks");
            }
        }
        outcome
    }

    async fn revert(&self, detected_incorrect_block_number: u64) -> Result<u64, RevertError> {
        if detected_incorrect_block_number == 0 {
            return Err(RevertError::GenesisMismatch);
        }
        let floor = self.blocks.last_executed_block_number().await?;
        if floor >= detected_incorrect_block_number {
            return Err(RevertError::IncorrectBlockIsFinalized {
                detected: detected_incorrect_block_number,
                floor,
            });
        }

        let last_correct = self.find_last_correct_block(floor, detected_incorrect_block_number).await?;
        info!(last_correct_block_number = last_correct, "reverting blocks");

        let deleted = self
            .uow
            .use_transaction(
                || async {
                    self.counters.revert(last_correct).await?;
                    self.blocks.delete_above(last_correct).await
                },
                TransactionOptions::default(),
            )
            .await?;
        debug!(deleted = deleted.into_output(), "blocks deleted");
        Ok(last_correct)
    }

    /// Binary search of `[floor, detected]`: `floor` is taken as correct,
    /// `detected` as incorrect, and correctness is assumed monotonic.
    pub async fn find_last_correct_block(&self, floor: u64, detected: u64) -> Result<u64, RevertError> {
        let (mut start, mut end) = (floor, detected);
        while end > start + 1 {
            let mid = start + (end - start) / 2;
            if self.is_hash_match(mid).await? {
                start = mid;
            } else {
                end = mid;
            }
        }
        Ok(start)
    }

    /// A block missing on either side counts as a mismatch.
    async fn is_hash_match(&self, number: u64) -> Result<bool, RevertError> {
        let local = self.blocks.block_hash(number).await?;
        let upstream = self.chain.block_hash(number).await?;
        let matched = matches!((&local, &upstream), (Some(l), Some(u)) if l == u);
        debug!(block_number = number, matched, "compared block hash");
        Ok(matched)
    }
}
