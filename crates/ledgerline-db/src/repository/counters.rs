//! `counters` and `counter_states` tables, plus the batched record reads
//! counters are computed from.

use std::collections::BTreeMap;

use sqlx::Row;
use tracing::debug;

use super::{check_identifier, to_db_number};
use crate::error::DbError;
use crate::unit_of_work::UnitOfWork;

/// Precomputed number of rows of `table_name` matching `query_string`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    pub table_name: String,
    pub query_string: String,
    pub count: i64,
}

/// A counted row: its record number and the text value of each selected
/// field (`None` for SQL `NULL`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountableRecord {
    pub number: i64,
    pub values: BTreeMap<String, Option<String>>,
}

impl CountableRecord {
    pub fn value(&self, field: &str) -> Option<&str> {
        self.values.get(field).and_then(|v| v.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct CounterRepository {
    uow: UnitOfWork,
}

impl CounterRepository {
    pub fn new(uow: UnitOfWork) -> Self {
        Self { uow }
    }

    /// Highest record number already folded into counters, −1 when none.
    pub async fn last_processed_record_number(&self, table_name: &str) -> Result<i64, DbError> {
        let row = self
            .uow
            .transaction_manager()
            .fetch_optional(
                sqlx::query("SELECT last_processed_record_number FROM counter_states WHERE table_name = $1")
                    .bind(table_name.to_string()),
            )
            .await?;
        match row {
            Some(row) => Ok(row.try_get("last_processed_record_number")?),
            None => Ok(-1),
        }
    }

    /// Add `counters` (inserting missing ones) and move the table's
    /// processing watermark to `last_processed_record_number`.
    pub async fn increment_counters(
        &self,
        counters: &[Counter],
        last_processed_record_number: i64,
    ) -> Result<(), DbError> {
        let Some(first) = counters.first() else {
            return Ok(());
        };
        let manager = self.uow.transaction_manager();
        for counter in counters {
            manager
                .execute(
                    sqlx::query(
                        "INSERT INTO counters (table_name, query_string, count) VALUES ($1, $2, $3) \
                         ON CONFLICT (table_name, query_string) \
                         DO UPDATE SET count = counters.count + excluded.count",
                    )
                    .bind(counter.table_name.clone())
                    .bind(counter.query_string.clone())
                    .bind(counter.count),
                )
                .await?;
        }
        manager
            .execute(
                sqlx::query(
                    "INSERT INTO counter_states (table_name, last_processed_record_number) VALUES ($1, $2) \
                     ON CONFLICT (table_name) \
                     DO UPDATE SET last_processed_record_number = excluded.last_processed_record_number",
                )
                .bind(first.table_name.clone())
                .bind(last_processed_record_number),
            )
            .await?;
        Ok(())
    }

    /// Subtract `counters`. The watermark is left alone: record numbers only
    /// grow, so reverted numbers are never reused.
    pub async fn decrement_counters(&self, counters: &[Counter]) -> Result<(), DbError> {
        let manager = self.uow.transaction_manager();
        for counter in counters {
            manager
                .execute(
                    sqlx::query(
                        "UPDATE counters SET count = count - $1 WHERE table_name = $2 AND query_string = $3",
                    )
                    .bind(counter.count)
                    .bind(counter.table_name.clone())
                    .bind(counter.query_string.clone()),
                )
                .await?;
        }
        Ok(())
    }

    /// Remove counters that reached zero. Returns how many were removed.
    pub async fn delete_empty(&self) -> Result<u64, DbError> {
        let result = self
            .uow
            .transaction_manager()
            .execute(sqlx::query("DELETE FROM counters WHERE count = 0"))
            .await?;
        debug!(deleted = result.rows_affected(), "empty counters deleted");
        Ok(result.rows_affected())
    }

    pub async fn count(&self, table_name: &str, query_string: &str) -> Result<Option<i64>, DbError> {
        let row = self
            .uow
            .transaction_manager()
            .fetch_optional(
                sqlx::query("SELECT count FROM counters WHERE table_name = $1 AND query_string = $2")
                    .bind(table_name.to_string())
                    .bind(query_string.to_string()),
            )
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("count")?)),
            None => Ok(None),
        }
    }

    /// Every counter of `table_name`, ordered by query string.
    pub async fn counters(&self, table_name: &str) -> Result<Vec<Counter>, DbError> {
        let rows = self
            .uow
            .transaction_manager()
            .fetch_all(
                sqlx::query(
                    "SELECT table_name, query_string, count FROM counters \
                     WHERE table_name = $1 ORDER BY query_string ASC",
                )
                .bind(table_name.to_string()),
            )
            .await?;
        rows.iter()
            .map(|row| -> Result<Counter, DbError> {
                Ok(Counter {
                    table_name: row.try_get("table_name")?,
                    query_string: row.try_get("query_string")?,
                    count: row.try_get("count")?,
                })
            })
            .collect()
    }

    /// Up to `limit` rows of `table` in record-number order, starting at
    /// `from_number`. With `to_number` the range is closed; with
    /// `above_block` only rows of later blocks are returned.
    pub async fn countable_records(
        &self,
        table: &str,
        fields: &[String],
        from_number: i64,
        to_number: Option<i64>,
        above_block: Option<u64>,
        limit: usize,
    ) -> Result<Vec<CountableRecord>, DbError> {
        let table = check_identifier(table)?;
        let mut select = String::from("number");
        for field in fields {
            let field = check_identifier(field)?;
            select.push_str(&format!(", CAST({field} AS TEXT) AS {field}"));
        }

        let mut sql = format!("SELECT {select} FROM {table} WHERE number >= $1");
        let mut next_param = 2;
        if to_number.is_some() {
            sql.push_str(&format!(" AND number <= ${next_param}"));
            next_param += 1;
        }
        if above_block.is_some() {
            sql.push_str(&format!(" AND block_number > ${next_param}"));
            next_param += 1;
        }
        sql.push_str(&format!(" ORDER BY number ASC LIMIT ${next_param}"));

        let mut query = sqlx::query(&sql).bind(from_number);
        if let Some(to) = to_number {
            query = query.bind(to);
        }
        if let Some(block) = above_block {
            query = query.bind(to_db_number(block)?);
        }
        let limit = i64::try_from(limit).map_err(|_| DbError::Decode(format!("limit {limit} exceeds i64")))?;
        query = query.bind(limit);

        let rows = self.uow.transaction_manager().fetch_all(query).await?;
        rows.iter()
            .map(|row| -> Result<CountableRecord, DbError> {
                let mut values = BTreeMap::new();
                for field in fields {
                    values.insert(field.clone(), row.try_get::<Option<String>, _>(field.as_str())?);
                }
                Ok(CountableRecord { number: row.try_get("number")?, values })
            })
            .collect()
    }
}
