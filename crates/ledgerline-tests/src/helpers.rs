//! Shared fixtures for the integration tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_tungstenite::tungstenite::{self, Message};

use ledgerline_core::error::RpcError;
use ledgerline_core::traits::ChainSource;
use ledgerline_core::types::{BlockRecord, BlockStatus};
use ledgerline_db::repository::{
    BalanceRecord, BalanceRepository, BlockRepository, LogRecord, LogRepository, TransactionRecord,
    TransactionRepository, TransferRecord, TransferRepository,
};
use ledgerline_db::{Database, UnitOfWork};
use ledgerline_rpc::{HeartbeatConfig, HeartbeatSocket};

/// A database in a temporary directory. Dropping it removes the files.
pub struct TestDb {
    pub db: Database,
    _dir: TempDir,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("ledgerline.sqlite").display());
        let db = Database::connect(&url, 4).await.unwrap();
        Self { db, _dir: dir }
    }

    pub fn uow(&self) -> UnitOfWork {
        self.db.unit_of_work()
    }
}

/// Hash of a locally indexed block.
pub fn local_hash(number: u64) -> String {
    format!("0x{number:064x}")
}

/// Hash of the competing block at `number` after a fork.
pub fn fork_hash(number: u64) -> String {
    format!("0xf{number:063x}")
}

/// Index blocks `range` with a few dependent rows each. Blocks up to
/// `executed_up_to` are marked executed, the rest sealed.
pub async fn seed_blocks(uow: &UnitOfWork, range: std::ops::RangeInclusive<u64>, executed_up_to: Option<u64>) {
    let blocks = BlockRepository::new(uow.clone());
    let txs = TransactionRepository::new(uow.clone());
    let logs = LogRepository::new(uow.clone());
    let transfers = TransferRepository::new(uow.clone());
    let balances = BalanceRepository::new(uow.clone());

    for number in range {
        let status = match executed_up_to {
            Some(executed) if number <= executed => BlockStatus::Executed,
            _ => BlockStatus::Sealed,
        };
        blocks
            .add(&BlockRecord {
                number,
                hash: local_hash(number),
                parent_hash: local_hash(number.saturating_sub(1)),
                status,
            })
            .await
            .unwrap();

        for i in 0..2u64 {
            let tx_hash = format!("0x{number:x}{i:02x}");
            txs.add(&TransactionRecord {
                hash: tx_hash.clone(),
                block_number: number,
                from_address: address(number + i),
                to_address: (i == 0).then(|| address(number % 3)),
            })
            .await
            .unwrap();
            logs.add(&LogRecord {
                block_number: number,
                transaction_hash: tx_hash.clone(),
                log_index: u32::try_from(i).unwrap(),
                address: token(number),
                data: "0x".into(),
            })
            .await
            .unwrap();
            transfers
                .add(&TransferRecord {
                    block_number: number,
                    transaction_hash: tx_hash,
                    token_address: token(number),
                    from_address: address(number + i),
                    to_address: address(number % 3),
                    amount: (number * 10 + i).to_string(),
                })
                .await
                .unwrap();
        }
        balances
            .add(&BalanceRecord {
                address: address(number % 3),
                token_address: token(number),
                block_number: number,
                balance: number.to_string(),
            })
            .await
            .unwrap();
    }
}

pub fn address(n: u64) -> String {
    format!("0xa{:039x}", n % 5)
}

pub fn token(n: u64) -> String {
    format!("0xt{:039x}", n % 2)
}

/// Upstream chain held in memory.
#[derive(Default)]
pub struct FakeChain {
    hashes: RwLock<HashMap<u64, String>>,
    lookups: AtomicUsize,
}

impl FakeChain {
    /// Agrees with [`local_hash`] up to `diverges_after`, forked up to `head`.
    pub fn forked(diverges_after: u64, head: u64) -> Self {
        let chain = Self::default();
        chain.reset(diverges_after, head);
        chain
    }

    pub fn reset(&self, diverges_after: u64, head: u64) {
        let mut hashes = self.hashes.write();
        hashes.clear();
        for number in 0..=head {
            let hash = if number <= diverges_after { local_hash(number) } else { fork_hash(number) };
            hashes.insert(number, hash);
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainSource for FakeChain {
    async fn block_hash(&self, number: u64) -> Result<Option<String>, RpcError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.hashes.read().get(&number).cloned())
    }

    async fn latest_block_number(&self) -> Result<u64, RpcError> {
        Ok(self.hashes.read().keys().copied().max().unwrap_or(0))
    }
}

/// In-process WebSocket peer. Every socket it hands out opens immediately;
/// it answers pings while `responsive` and answers every call with
/// `block_number` as a hex quantity.
#[derive(Clone)]
pub struct FakeNode {
    responsive: Arc<AtomicBool>,
    block_number: Arc<Mutex<u64>>,
    sockets_created: Arc<AtomicUsize>,
}

impl Default for FakeNode {
    fn default() -> Self {
        Self {
            responsive: Arc::new(AtomicBool::new(true)),
            block_number: Arc::new(Mutex::new(16)),
            sockets_created: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FakeNode {
    pub fn set_responsive(&self, responsive: bool) {
        self.responsive.store(responsive, Ordering::SeqCst);
    }

    pub fn set_block_number(&self, number: u64) {
        *self.block_number.lock() = number;
    }

    pub fn sockets_created(&self) -> usize {
        self.sockets_created.load(Ordering::SeqCst)
    }

    /// A socket connected to this node.
    pub fn socket(&self, config: HeartbeatConfig) -> HeartbeatSocket {
        self.sockets_created.fetch_add(1, Ordering::SeqCst);
        let (client_tx, from_client) = mpsc::unbounded::<Message>();
        let (to_client, client_rx) = mpsc::unbounded::<Result<Message, tungstenite::Error>>();
        tokio::spawn(self.clone().serve(from_client, to_client));
        HeartbeatSocket::spawn(async move { Ok((client_tx, client_rx)) }, config)
    }

    async fn serve(
        self,
        mut from_client: mpsc::UnboundedReceiver<Message>,
        to_client: mpsc::UnboundedSender<Result<Message, tungstenite::Error>>,
    ) {
        while let Some(message) = from_client.next().await {
            let reply = match message {
                Message::Ping(payload) if self.responsive.load(Ordering::SeqCst) => Message::Pong(payload),
                Message::Text(text) => {
                    let Ok(request) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    let number = *self.block_number.lock();
                    let response = json!({
                        "jsonrpc": "2.0",
                        "id": request["id"],
                        "result": format!("0x{number:x}"),
                    });
                    Message::Text(response.to_string())
                }
                _ => continue,
            };
            if to_client.unbounded_send(Ok(reply)).is_err() {
                break;
            }
        }
    }
}
