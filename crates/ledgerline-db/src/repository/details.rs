//! Rows that hang off a block: transactions, logs, transfers, balances.
//!
//! All of them reference `blocks.number` with `ON DELETE CASCADE`, which is
//! what lets a revert remove them by deleting blocks.

use sqlx::Row;

use super::{check_identifier, from_db_number, to_db_number};
use crate::error::DbError;
use crate::unit_of_work::{TransactionManager, UnitOfWork};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub hash: String,
    pub block_number: u64,
    pub from_address: String,
    pub to_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u32,
    pub address: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub block_number: u64,
    pub transaction_hash: String,
    pub token_address: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceRecord {
    pub address: String,
    pub token_address: String,
    pub block_number: u64,
    pub balance: String,
}

async fn count_above(manager: TransactionManager, table: &str, block_number: u64) -> Result<u64, DbError> {
    let sql = format!(
        "SELECT COUNT(*) AS count FROM {} WHERE block_number > $1",
        check_identifier(table)?
    );
    let row = manager
        .fetch_one(sqlx::query(&sql).bind(to_db_number(block_number)?))
        .await?;
    from_db_number(row.try_get("count")?)
}

#[derive(Debug, Clone)]
pub struct TransactionRepository {
    uow: UnitOfWork,
}

impl TransactionRepository {
    pub const TABLE: &'static str = "transactions";

    pub fn new(uow: UnitOfWork) -> Self {
        Self { uow }
    }

    /// Insert and return the assigned record number.
    pub async fn add(&self, record: &TransactionRecord) -> Result<i64, DbError> {
        let row = self
            .uow
            .transaction_manager()
            .fetch_one(
                sqlx::query(
                    "INSERT INTO transactions (hash, block_number, from_address, to_address) \
                     VALUES ($1, $2, $3, $4) RETURNING number",
                )
                .bind(record.hash.clone())
                .bind(to_db_number(record.block_number)?)
                .bind(record.from_address.clone())
                .bind(record.to_address.clone()),
            )
            .await?;
        Ok(row.try_get("number")?)
    }

    pub async fn count_above(&self, block_number: u64) -> Result<u64, DbError> {
        count_above(self.uow.transaction_manager(), Self::TABLE, block_number).await
    }
}

#[derive(Debug, Clone)]
pub struct LogRepository {
    uow: UnitOfWork,
}

impl LogRepository {
    pub const TABLE: &'static str = "logs";

    pub fn new(uow: UnitOfWork) -> Self {
        Self { uow }
    }

    pub async fn add(&self, record: &LogRecord) -> Result<i64, DbError> {
        let row = self
            .uow
            .transaction_manager()
            .fetch_one(
                sqlx::query(
                    "INSERT INTO logs (block_number, transaction_hash, log_index, address, data) \
                     VALUES ($1, $2, $3, $4, $5) RETURNING number",
                )
                .bind(to_db_number(record.block_number)?)
                .bind(record.transaction_hash.clone())
                .bind(i64::from(record.log_index))
                .bind(record.address.clone())
                .bind(record.data.clone()),
            )
            .await?;
        Ok(row.try_get("number")?)
    }

    pub async fn count_above(&self, block_number: u64) -> Result<u64, DbError> {
        count_above(self.uow.transaction_manager(), Self::TABLE, block_number).await
    }
}

#[derive(Debug, Clone)]
pub struct TransferRepository {
    uow: UnitOfWork,
}

impl TransferRepository {
    pub const TABLE: &'static str = "transfers";

    pub fn new(uow: UnitOfWork) -> Self {
        Self { uow }
    }

    pub async fn add(&self, record: &TransferRecord) -> Result<i64, DbError> {
        let row = self
            .uow
            .transaction_manager()
            .fetch_one(
                sqlx::query(
                    "INSERT INTO transfers \
                     (block_number, transaction_hash, token_address, from_address, to_address, amount) \
                     VALUES ($1, $2, $3, $4, $5, $6) RETURNING number",
                )
                .bind(to_db_number(record.block_number)?)
                .bind(record.transaction_hash.clone())
                .bind(record.token_address.clone())
                .bind(record.from_address.clone())
                .bind(record.to_address.clone())
                .bind(record.amount.clone()),
            )
            .await?;
        Ok(row.try_get("number")?)
    }

    pub async fn count_above(&self, block_number: u64) -> Result<u64, DbError> {
        count_above(self.uow.transaction_manager(), Self::TABLE, block_number).await
    }
}

#[derive(Debug, Clone)]
pub struct BalanceRepository {
    uow: UnitOfWork,
}

impl BalanceRepository {
    pub const TABLE: &'static str = "balances";

    pub fn new(uow: UnitOfWork) -> Self {
        Self { uow }
    }

    pub async fn add(&self, record: &BalanceRecord) -> Result<(), DbError> {
        self.uow
            .transaction_manager()
            .execute(
                sqlx::query(
                    "INSERT INTO balances (address, token_address, block_number, balance) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(record.address.clone())
                .bind(record.token_address.clone())
                .bind(to_db_number(record.block_number)?)
                .bind(record.balance.clone()),
            )
            .await?;
        Ok(())
    }

    pub async fn count_above(&self, block_number: u64) -> Result<u64, DbError> {
        count_above(self.uow.transaction_manager(), Self::TABLE, block_number).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::repository::BlockRepository;
    use ledgerline_core::types::{BlockRecord, BlockStatus};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, UnitOfWork) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("details.sqlite").display());
        let db = Database::connect(&url, 2).await.unwrap();
        let uow = db.unit_of_work();
        let blocks = BlockRepository::new(uow.clone());
        for number in 0..4 {
            blocks
                .add(&BlockRecord {
                    number,
                    hash: format!("0x{number}"),
                    parent_hash: String::new(),
                    status: BlockStatus::Sealed,
                })
                .await
                .unwrap();
        }
        (dir, uow)
    }

    #[tokio::test]
    async fn record_numbers_increase() {
        let (_dir, uow) = setup().await;
        let txs = TransactionRepository::new(uow);
        let first = txs
            .add(&TransactionRecord {
                hash: "0xt1".into(),
                block_number: 1,
                from_address: "0xa".into(),
                to_address: Some("0xb".into()),
            })
            .await
            .unwrap();
        let second = txs
            .add(&TransactionRecord {
                hash: "0xt2".into(),
                block_number: 2,
                from_address: "0xa".into(),
                to_address: None,
            })
            .await
            .unwrap();
        assert!(second > first);
        assert_eq!(txs.count_above(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rows_require_an_existing_block() {
        let (_dir, uow) = setup().await;
        let logs = LogRepository::new(uow);
        let orphan = LogRecord {
            block_number: 99,
            transaction_hash: "0xt".into(),
            log_index: 0,
            address: "0xc".into(),
            data: "0x".into(),
        };
        assert!(matches!(logs.add(&orphan).await, Err(DbError::Sqlx(_))));
    }

    #[tokio::test]
    async fn deleting_blocks_cascades() {
        let (_dir, uow) = setup().await;
        let transfers = TransferRepository::new(uow.clone());
        let balances = BalanceRepository::new(uow.clone());
        for block_number in 0..4 {
            transfers
                .add(&TransferRecord {
                    block_number,
                    transaction_hash: format!("0xt{block_number}"),
                    token_address: "0xtoken".into(),
                    from_address: "0xa".into(),
                    to_address: "0xb".into(),
                    amount: "100".into(),
                })
                .await
                .unwrap();
            balances
                .add(&BalanceRecord {
                    address: "0xa".into(),
                    token_address: "0xtoken".into(),
                    block_number,
                    balance: "1".into(),
                })
                .await
                .unwrap();
        }
        assert_eq!(transfers.count_above(0).await.unwrap(), 3);

        BlockRepository::new(uow).delete_above(1).await.unwrap();
        assert_eq!(transfers.count_above(1).await.unwrap(), 0);
        assert_eq!(balances.count_above(1).await.unwrap(), 0);
        assert_eq!(transfers.count_above(0).await.unwrap(), 1);
    }
}
