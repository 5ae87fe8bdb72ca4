//! Fixed-size pool of [`HeartbeatSocket`]s that heals itself.
//!
//! Every `reconcile_interval` the pool replaces each closed socket with a
//! fresh one built by its factory. Callers pick a socket at random among the
//! ones that are not closed; the pool itself never fails a pick while at
//! least one slot is `Connecting` or `Open`. A call that loses its socket
//! mid-flight moves on to another live socket it has not tried yet.

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use ledgerline_core::error::RpcError;
use ledgerline_core::traits::{ChainSource, ConnectionStatus, RpcTransport};
use ledgerline_core::types::ConnectionState;

use crate::chain;
use crate::config::{HeartbeatConfig, PoolConfig};
use crate::heartbeat::HeartbeatSocket;

type SocketFactory = Arc<dyn Fn() -> HeartbeatSocket + Send + Sync>;

pub struct SocketPool {
    slots: RwLock<Vec<Arc<HeartbeatSocket>>>,
    factory: SocketFactory,
    config: PoolConfig,
}

impl fmt::Debug for SocketPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketPool")
            .field("size", &self.config.size)
            .field("states", &self.slot_states())
            .finish()
    }
}

impl SocketPool {
    /// Build a pool whose slots are produced by `factory`.
    ///
    /// All slots are created immediately, so the pool starts with
    /// `config.size` sockets in `Connecting`.
    pub fn new<F>(config: PoolConfig, factory: F) -> Self
    where
        F: Fn() -> HeartbeatSocket + Send + Sync + 'static,
    {
        let slots = (0..config.size).map(|_| Arc::new(factory())).collect();
        Self {
            slots: RwLock::new(slots),
            factory: Arc::new(factory),
            config,
        }
    }

    /// Pool of WebSocket connections to `url`.
    pub fn connect(url: &str, config: PoolConfig, heartbeat: HeartbeatConfig) -> Self {
        let url = url.to_string();
        Self::new(config, move || HeartbeatSocket::connect(&url, heartbeat))
    }

    pub fn size(&self) -> usize {
        self.config.size
    }

    /// A random socket that is `Connecting` or `Open`.
    pub fn provider(&self) -> Result<Arc<HeartbeatSocket>, RpcError> {
        self.provider_excluding(&[])
    }

    /// Like [`provider`](Self::provider), skipping the sockets whose ids are
    /// in `tried`.
    pub fn provider_excluding(&self, tried: &[u64]) -> Result<Arc<HeartbeatSocket>, RpcError> {
        let slots = self.slots.read();
        let live: Vec<&Arc<HeartbeatSocket>> = slots
            .iter()
            .filter(|socket| socket.state() != ConnectionState::Closed && !tried.contains(&socket.id()))
            .collect();
        live.choose(&mut rand::thread_rng())
            .map(|socket| Arc::clone(socket))
            .ok_or(RpcError::NoActiveConnection)
    }

    /// Replace every closed slot with a new socket. Returns how many were replaced.
    pub fn reconcile(&self) -> usize {
        let mut slots = self.slots.write();
        let mut replaced = 0;
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.state() == ConnectionState::Closed {
                let fresh = Arc::new((self.factory)());
                debug!(slot = index, old = slot.id(), new = fresh.id(), "replacing closed socket");
                *slot = fresh;
                replaced += 1;
            }
        }
        if replaced > 0 {
            info!(replaced, size = slots.len(), "socket pool reconciled");
        }
        replaced
    }

    /// Run [`reconcile`](Self::reconcile) every `reconcile_interval`.
    ///
    /// The task holds only a weak reference and ends once the pool is dropped.
    pub fn spawn_reconciler(self: &Arc<Self>) -> JoinHandle<()> {
        let pool: Weak<Self> = Arc::downgrade(self);
        let period = self.config.reconcile_interval;
        tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    debug!("socket pool dropped, reconciler exiting");
                    break;
                };
                pool.reconcile();
            }
        })
    }

    /// Ask every slot to close. Slots are not replaced afterwards unless
    /// [`reconcile`](Self::reconcile) runs again.
    pub fn close(&self) {
        let slots = self.slots.read();
        for socket in slots.iter() {
            socket.close();
        }
        info!(size = slots.len(), "socket pool closed");
    }

    /// Current state of every slot, in slot order.
    pub fn slot_states(&self) -> Vec<ConnectionState> {
        self.slots.read().iter().map(|socket| socket.state()).collect()
    }
}

impl ConnectionStatus for SocketPool {
    /// `Open` if any slot is open, else `Connecting` if any is connecting,
    /// else `Closed`.
    fn state(&self) -> ConnectionState {
        let states = self.slot_states();
        if states.contains(&ConnectionState::Open) {
            ConnectionState::Open
        } else if states.contains(&ConnectionState::Connecting) {
            ConnectionState::Connecting
        } else {
            ConnectionState::Closed
        }
    }
}

#[async_trait]
impl RpcTransport for SocketPool {
    /// Fails over to an untried live socket when the chosen one drops the
    /// call. Once none is left the error is `NoActiveConnection`.
    async fn send(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        let mut tried = Vec::new();
        loop {
            let socket = self.provider_excluding(&tried)?;
            match socket.request(method, params).await {
                Err(e @ (RpcError::ConnectionClosed | RpcError::Transport(_))) => {
                    debug!(socket = socket.id(), method, error = %e, "socket dropped call, failing over");
                    tried.push(socket.id());
                }
                outcome => return outcome,
            }
        }
    }
}

#[async_trait]
impl ChainSource for SocketPool {
    async fn block_hash(&self, number: u64) -> Result<Option<String>, RpcError> {
        chain::fetch_block_hash(self, number).await
    }

    async fn latest_block_number(&self) -> Result<u64, RpcError> {
        chain::fetch_latest_block_number(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use futures::channel::mpsc as chan;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::watch;
    use tokio_tungstenite::tungstenite::{self, Message};

    /// Socket whose peer answers every call with `0x10`, or, when `drops`
    /// is set, goes away as soon as a call arrives.
    fn peer_socket(drops: bool) -> HeartbeatSocket {
        let (client_tx, mut from_client) = chan::unbounded::<Message>();
        let (to_client, client_rx) = chan::unbounded::<Result<Message, tungstenite::Error>>();
        tokio::spawn(async move {
            while let Some(message) = from_client.next().await {
                let Message::Text(text) = message else { continue };
                if drops {
                    break;
                }
                let request: Value = serde_json::from_str(&text).unwrap();
                let reply = json!({ "jsonrpc": "2.0", "id": request["id"], "result": "0x10" });
                if to_client.unbounded_send(Ok(Message::Text(reply.to_string()))).is_err() {
                    break;
                }
            }
        });
        HeartbeatSocket::spawn(async move { Ok((client_tx, client_rx)) }, HeartbeatConfig::default())
    }

    /// Two slots: the first created drops calls, the second answers.
    fn flaky_pool(drop_both: bool) -> SocketPool {
        let created = AtomicUsize::new(0);
        let config = PoolConfig { size: 2, ..PoolConfig::default() };
        SocketPool::new(config, move || {
            let first = created.fetch_add(1, Ordering::SeqCst) == 0;
            peer_socket(first || drop_both)
        })
    }

    /// Factory handing out stub sockets and keeping their state handles.
    #[derive(Clone, Default)]
    struct StubFactory {
        handles: Arc<Mutex<Vec<watch::Sender<ConnectionState>>>>,
    }

    impl StubFactory {
        fn pool(&self, size: usize) -> SocketPool {
            let handles = Arc::clone(&self.handles);
            let config = PoolConfig { size, ..PoolConfig::default() };
            SocketPool::new(config, move || {
                let (socket, tx) = HeartbeatSocket::stub(ConnectionState::Connecting);
                handles.lock().push(tx);
                socket
            })
        }

        fn set(&self, index: usize, state: ConnectionState) {
            self.handles.lock()[index].send_replace(state);
        }

        fn created(&self) -> usize {
            self.handles.lock().len()
        }
    }

    #[tokio::test]
    async fn creates_all_slots_eagerly() {
        let f = StubFactory::default();
        let pool = f.pool(5);
        assert_eq!(f.created(), 5);
        assert_eq!(pool.slot_states(), vec![ConnectionState::Connecting; 5]);
        assert_eq!(pool.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn provider_never_returns_closed_socket() {
        let f = StubFactory::default();
        let pool = f.pool(3);
        f.set(0, ConnectionState::Closed);
        f.set(2, ConnectionState::Closed);
        f.set(1, ConnectionState::Open);
        for _ in 0..50 {
            assert_eq!(pool.provider().unwrap().state(), ConnectionState::Open);
        }
    }

    #[tokio::test]
    async fn all_closed_is_no_active_connection() {
        let f = StubFactory::default();
        let pool = f.pool(2);
        f.set(0, ConnectionState::Closed);
        f.set(1, ConnectionState::Closed);
        assert_eq!(pool.provider().unwrap_err(), RpcError::NoActiveConnection);
        assert_eq!(pool.state(), ConnectionState::Closed);
        assert_eq!(pool.send("eth_blockNumber", &[]).await, Err(RpcError::NoActiveConnection));
    }

    #[tokio::test]
    async fn reconcile_replaces_only_closed_slots() {
        let f = StubFactory::default();
        let pool = f.pool(4);
        f.set(0, ConnectionState::Open);
        f.set(1, ConnectionState::Closed);
        f.set(3, ConnectionState::Closed);

        assert_eq!(pool.reconcile(), 2);
        assert_eq!(f.created(), 6);
        assert_eq!(
            pool.slot_states(),
            vec![
                ConnectionState::Open,
                ConnectionState::Connecting,
                ConnectionState::Connecting,
                ConnectionState::Connecting,
            ]
        );
        assert_eq!(pool.state(), ConnectionState::Open);
        assert_eq!(pool.reconcile(), 0);
    }

    #[tokio::test]
    async fn dropped_call_fails_over_to_healthy_socket() {
        for _ in 0..20 {
            let pool = flaky_pool(false);
            assert_eq!(pool.send("eth_blockNumber", &[]).await, Ok(json!("0x10")));
            assert_eq!(pool.state(), ConnectionState::Open);
        }
    }

    #[tokio::test]
    async fn every_socket_dropping_is_no_active_connection() {
        let pool = flaky_pool(true);
        assert_eq!(pool.send("eth_blockNumber", &[]).await, Err(RpcError::NoActiveConnection));
    }

    #[tokio::test]
    async fn provider_skips_tried_sockets() {
        let f = StubFactory::default();
        let pool = f.pool(2);
        let first = pool.provider().unwrap();
        let second = pool.provider_excluding(&[first.id()]).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(
            pool.provider_excluding(&[first.id(), second.id()]).unwrap_err(),
            RpcError::NoActiveConnection
        );
    }

    #[tokio::test]
    async fn close_closes_every_slot() {
        let pool = flaky_pool(false);
        assert_eq!(pool.send("eth_blockNumber", &[]).await, Ok(json!("0x10")));
        pool.close();
        for _ in 0..1000 {
            if pool.state() == ConnectionState::Closed {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.slot_states(), vec![ConnectionState::Closed; 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn reconciler_heals_on_interval() {
        let f = StubFactory::default();
        let pool = Arc::new(f.pool(2));
        let task = pool.spawn_reconciler();
        f.set(1, ConnectionState::Closed);

        time::sleep(Duration::from_secs(9)).await;
        assert_eq!(f.created(), 2);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(f.created(), 3);
        assert!(!pool.slot_states().contains(&ConnectionState::Closed));

        drop(pool);
        time::sleep(Duration::from_secs(11)).await;
        assert!(task.is_finished());
    }
}
