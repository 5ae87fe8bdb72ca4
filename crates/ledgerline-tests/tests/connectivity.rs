//! Socket pool and hedged client against in-process nodes, under paused time.

use std::sync::Arc;
use std::time::Duration;

use ledgerline_core::error::RpcError;
use ledgerline_core::traits::{ChainSource, ConnectionStatus};
use ledgerline_core::types::ConnectionState;
use ledgerline_rpc::{HedgeConfig, HedgedClient, HeartbeatConfig, PoolConfig, SocketPool};
use ledgerline_tests::helpers::*;

const SIZE: usize = 3;

fn pool_for(node: &FakeNode) -> Arc<SocketPool> {
    let node = node.clone();
    let config = PoolConfig { size: SIZE, ..PoolConfig::default() };
    Arc::new(SocketPool::new(config, move || node.socket(HeartbeatConfig::default())))
}

async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn pool_serves_requests_from_live_sockets() {
    let node = FakeNode::default();
    node.set_block_number(0x2a);
    let pool = pool_for(&node);

    assert_eq!(pool.latest_block_number().await.unwrap(), 42);
    advance(1).await;
    assert_eq!(pool.state(), ConnectionState::Open);
    assert_eq!(pool.slot_states(), vec![ConnectionState::Open; SIZE]);
    assert_eq!(node.sockets_created(), SIZE);
}

#[tokio::test(start_paused = true)]
async fn responsive_sockets_survive_many_heartbeats() {
    let node = FakeNode::default();
    let pool = pool_for(&node);
    let _reconciler = pool.spawn_reconciler();

    advance(120).await;
    assert_eq!(pool.slot_states(), vec![ConnectionState::Open; SIZE]);
    assert_eq!(node.sockets_created(), SIZE);
    assert_eq!(pool.latest_block_number().await.unwrap(), 16);
}

#[tokio::test(start_paused = true)]
async fn silent_sockets_are_terminated_and_replaced() {
    let node = FakeNode::default();
    node.set_responsive(false);
    let pool = pool_for(&node);
    let _reconciler = pool.spawn_reconciler();

    // Pings at 7s and 14s go unanswered; the first one expires at 22s.
    advance(21).await;
    assert_eq!(pool.slot_states(), vec![ConnectionState::Open; SIZE]);
    advance(2).await;
    assert_eq!(pool.state(), ConnectionState::Closed);
    assert!(matches!(pool.latest_block_number().await, Err(RpcError::NoActiveConnection)));

    // The next reconcile pass, at 30s, replaces every slot.
    node.set_responsive(true);
    advance(8).await;
    assert_eq!(node.sockets_created(), 2 * SIZE);
    assert_eq!(pool.slot_states(), vec![ConnectionState::Open; SIZE]);
    assert_eq!(pool.latest_block_number().await.unwrap(), 16);

    advance(60).await;
    assert_eq!(node.sockets_created(), 2 * SIZE);
}

#[tokio::test(start_paused = true)]
async fn reconciler_stops_with_the_pool() {
    let node = FakeNode::default();
    node.set_responsive(false);
    let pool = pool_for(&node);
    let reconciler = pool.spawn_reconciler();

    drop(pool);
    advance(40).await;
    assert!(reconciler.is_finished());
    assert_eq!(node.sockets_created(), SIZE);
}

#[tokio::test(start_paused = true)]
async fn hedged_client_over_pool() {
    let node = FakeNode::default();
    node.set_block_number(7);
    let pool = pool_for(&node);
    let client = HedgedClient::new(Arc::clone(&pool), HedgeConfig::default());

    assert_eq!(client.latest_block_number().await.unwrap(), 7);
    assert_eq!(client.state(), ConnectionState::Open);
}
