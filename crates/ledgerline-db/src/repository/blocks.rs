//! `blocks` table.

use sqlx::Row;
use sqlx::any::AnyRow;

use ledgerline_core::types::{BlockRecord, BlockStatus};

use super::{from_db_number, to_db_number};
use crate::error::DbError;
use crate::unit_of_work::UnitOfWork;

#[derive(Debug, Clone)]
pub struct BlockRepository {
    uow: UnitOfWork,
}

impl BlockRepository {
    pub fn new(uow: UnitOfWork) -> Self {
        Self { uow }
    }

    pub async fn add(&self, block: &BlockRecord) -> Result<(), DbError> {
        self.uow
            .transaction_manager()
            .execute(
                sqlx::query("INSERT INTO blocks (number, hash, parent_hash, status) VALUES ($1, $2, $3, $4)")
                    .bind(to_db_number(block.number)?)
                    .bind(block.hash.clone())
                    .bind(block.parent_hash.clone())
                    .bind(block.status.as_str()),
            )
            .await?;
        Ok(())
    }

    pub async fn set_status(&self, number: u64, status: BlockStatus) -> Result<bool, DbError> {
        let result = self
            .uow
            .transaction_manager()
            .execute(
                sqlx::query("UPDATE blocks SET status = $1 WHERE number = $2")
                    .bind(status.as_str())
                    .bind(to_db_number(number)?),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Locally stored hash of block `number`.
    pub async fn block_hash(&self, number: u64) -> Result<Option<String>, DbError> {
        let row = self
            .uow
            .transaction_manager()
            .fetch_optional(sqlx::query("SELECT hash FROM blocks WHERE number = $1").bind(to_db_number(number)?))
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("hash")?),
            None => None,
        })
    }

    pub async fn block(&self, number: u64) -> Result<Option<BlockRecord>, DbError> {
        let row = self
            .uow
            .transaction_manager()
            .fetch_optional(
                sqlx::query("SELECT number, hash, parent_hash, status FROM blocks WHERE number = $1")
                    .bind(to_db_number(number)?),
            )
            .await?;
        row.as_ref().map(block_from_row).transpose()
    }

    /// Highest stored block, whatever its status.
    pub async fn latest_block(&self) -> Result<Option<BlockRecord>, DbError> {
        let row = self
            .uow
            .transaction_manager()
            .fetch_optional(sqlx::query(
                "SELECT number, hash, parent_hash, status FROM blocks ORDER BY number DESC LIMIT 1",
            ))
            .await?;
        row.as_ref().map(block_from_row).transpose()
    }

    /// Highest block with [`BlockStatus::Executed`], 0 when there is none.
    pub async fn last_executed_block_number(&self) -> Result<u64, DbError> {
        let row = self
            .uow
            .transaction_manager()
            .fetch_one(
                sqlx::query("SELECT MAX(number) AS number FROM blocks WHERE status = $1")
                    .bind(BlockStatus::Executed.as_str()),
            )
            .await?;
        let number: Option<i64> = row.try_get("number")?;
        number.map_or(Ok(0), from_db_number)
    }

    /// Delete every block above `number`. Dependent rows go with them by
    /// cascade. Returns the number of blocks deleted.
    pub async fn delete_above(&self, number: u64) -> Result<u64, DbError> {
        let result = self
            .uow
            .transaction_manager()
            .execute(sqlx::query("DELETE FROM blocks WHERE number > $1").bind(to_db_number(number)?))
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<u64, DbError> {
        let row = self
            .uow
            .transaction_manager()
            .fetch_one(sqlx::query("SELECT COUNT(*) AS count FROM blocks"))
            .await?;
        from_db_number(row.try_get("count")?)
    }
}

fn block_from_row(row: &AnyRow) -> Result<BlockRecord, DbError> {
    let status: String = row.try_get("status")?;
    Ok(BlockRecord {
        number: from_db_number(row.try_get("number")?)?,
        hash: row.try_get("hash")?,
        parent_hash: row.try_get("parent_hash")?,
        status: status.parse().map_err(|e: ledgerline_core::ChainError| DbError::Decode(e.to_string()))?,
    })
}
