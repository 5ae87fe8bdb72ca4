//! Reorg reconciliation against a seeded database.

use std::sync::Arc;

use ledgerline_db::UnitOfWork;
use ledgerline_db::repository::{
    BalanceRepository, BlockRepository, Counter, CounterRepository, LogRepository,
    TransactionRepository, TransferRepository,
};
use ledgerline_tests::helpers::*;
use ledgerline_worker_lib::{
    BlocksRevertService, CounterCriteria, CounterProcessor, CounterService, RevertError, RevertWatcher,
};

const BATCH: usize = 4;

async fn process_all(service: &CounterService) {
    for processor in service.processors() {
        while processor.process_next_batch().await.unwrap() {}
    }
}

async fn all_counters(uow: &UnitOfWork) -> Vec<Counter> {
    let repo = CounterRepository::new(uow.clone());
    let mut counters = repo.counters("transactions").await.unwrap();
    counters.extend(repo.counters("transfers").await.unwrap());
    counters
}

/// Counters of a database holding exactly `0..=head`.
async fn reference_counters(head: u64) -> Vec<Counter> {
    let db = TestDb::new().await;
    seed_blocks(&db.uow(), 0..=head, None).await;
    let service = CounterService::with_default_processors(db.uow(), BATCH);
    process_all(&service).await;
    all_counters(&db.uow()).await
}

#[tokio::test]
async fn reorg_truncates_to_divergence_point() {
    let db = TestDb::new().await;
    let uow = db.uow();
    seed_blocks(&uow, 0..=10, Some(2)).await;
    let counters = CounterService::with_default_processors(uow.clone(), BATCH);
    process_all(&counters).await;

    let chain = Arc::new(FakeChain::forked(6, 10));
    let service = BlocksRevertService::new(Arc::clone(&chain), uow.clone(), counters.clone());

    let last_correct = service.handle_revert(10).await.unwrap();
    assert_eq!(last_correct, 6);

    let blocks = BlockRepository::new(uow.clone());
    assert_eq!(blocks.latest_block().await.unwrap().unwrap().number, 6);
    assert_eq!(blocks.count().await.unwrap(), 7);
    assert_eq!(blocks.block_hash(6).await.unwrap(), Some(local_hash(6)));

    // Dependent rows went with their blocks.
    assert_eq!(TransactionRepository::new(uow.clone()).count_above(6).await.unwrap(), 0);
    assert_eq!(LogRepository::new(uow.clone()).count_above(6).await.unwrap(), 0);
    assert_eq!(TransferRepository::new(uow.clone()).count_above(6).await.unwrap(), 0);
    assert_eq!(BalanceRepository::new(uow.clone()).count_above(6).await.unwrap(), 0);
    assert!(TransactionRepository::new(uow.clone()).count_above(0).await.unwrap() > 0);

    assert_eq!(all_counters(&uow).await, reference_counters(6).await);
}

#[tokio::test]
async fn counting_resumes_after_revert() {
    let db = TestDb::new().await;
    let uow = db.uow();
    seed_blocks(&uow, 0..=10, Some(2)).await;
    let counters = CounterService::with_default_processors(uow.clone(), BATCH);
    process_all(&counters).await;

    let chain = Arc::new(FakeChain::forked(6, 10));
    let service = BlocksRevertService::new(Arc::clone(&chain), uow.clone(), counters.clone());
    service.handle_revert(10).await.unwrap();

    // The indexer re-ingests the canonical blocks 7..=10.
    seed_blocks(&uow, 7..=10, Some(2)).await;
    process_all(&counters).await;

    assert_eq!(all_counters(&uow).await, reference_counters(10).await);
}

#[tokio::test]
async fn failed_revert_leaves_state_untouched() {
    let db = TestDb::new().await;
    let uow = db.uow();
    seed_blocks(&uow, 0..=10, Some(2)).await;

    let valid = CounterProcessor::new(
        "transactions",
        vec![CounterCriteria::new(["from_address|to_address"])],
        BATCH,
        uow.clone(),
    );
    while valid.process_next_batch().await.unwrap() {}
    let broken = CounterProcessor::new(
        "transactions",
        vec![CounterCriteria::new(["no_such_column"])],
        BATCH,
        uow.clone(),
    );
    let counters = CounterService::new(vec![valid, broken], uow.clone());
    let before = all_counters(&uow).await;
    assert!(!before.is_empty());

    let chain = Arc::new(FakeChain::forked(6, 10));
    let service = BlocksRevertService::new(Arc::clone(&chain), uow.clone(), counters);

    // The first processor has already decremented when the second fails.
    let err = service.handle_revert(10).await.unwrap_err();
    assert!(matches!(err, RevertError::Db(_)), "unexpected error: {err}");

    assert_eq!(all_counters(&uow).await, before);
    assert_eq!(BlockRepository::new(uow.clone()).count().await.unwrap(), 11);
    assert!(TransactionRepository::new(uow.clone()).count_above(6).await.unwrap() > 0);
}

#[tokio::test]
async fn finalized_block_is_never_reverted() {
    let db = TestDb::new().await;
    let uow = db.uow();
    seed_blocks(&uow, 0..=10, Some(8)).await;
    let chain = Arc::new(FakeChain::forked(6, 10));
    let service = BlocksRevertService::new(
        Arc::clone(&chain),
        uow.clone(),
        CounterService::with_default_processors(uow.clone(), BATCH),
    );

    let err = service.handle_revert(8).await.unwrap_err();
    assert!(matches!(err, RevertError::IncorrectBlockIsFinalized { detected: 8, floor: 8 }));
    assert_eq!(chain.lookups(), 0);
    assert_eq!(BlockRepository::new(uow).count().await.unwrap(), 11);
}

#[tokio::test]
async fn search_stays_above_executed_floor() {
    let db = TestDb::new().await;
    let uow = db.uow();
    seed_blocks(&uow, 0..=10, Some(5)).await;
    // Upstream disagrees from block 3 on, but 5 is already executed.
    let chain = Arc::new(FakeChain::forked(2, 10));
    let service = BlocksRevertService::new(
        Arc::clone(&chain),
        uow.clone(),
        CounterService::with_default_processors(uow.clone(), BATCH),
    );

    assert_eq!(service.handle_revert(10).await.unwrap(), 5);
    assert_eq!(BlockRepository::new(uow).latest_block().await.unwrap().unwrap().number, 5);
}

#[tokio::test]
async fn watcher_detects_fork_and_reverts() {
    let db = TestDb::new().await;
    let uow = db.uow();
    seed_blocks(&uow, 0..=10, Some(2)).await;
    let counters = CounterService::with_default_processors(uow.clone(), BATCH);
    process_all(&counters).await;

    // Upstream agrees with everything first.
    let chain = Arc::new(FakeChain::forked(10, 10));
    let service = Arc::new(BlocksRevertService::new(Arc::clone(&chain), uow.clone(), counters));
    let watcher = RevertWatcher::new(Arc::clone(&service), std::time::Duration::from_secs(1));
    assert_eq!(watcher.tick().await.unwrap(), None);

    chain.reset(4, 12);
    assert_eq!(watcher.tick().await.unwrap(), Some(4));
    assert_eq!(BlockRepository::new(uow.clone()).count().await.unwrap(), 5);

    // Local head now matches; nothing more to do.
    assert_eq!(watcher.tick().await.unwrap(), None);
    assert_eq!(all_counters(&uow).await, reference_counters(4).await);
}
