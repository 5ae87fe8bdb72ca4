//! Table access. Every repository resolves its executor through
//! [`UnitOfWork::transaction_manager`](crate::UnitOfWork::transaction_manager)
//! on each call, so the same repository works inside and outside a
//! transaction context.

pub mod blocks;
pub mod counters;
pub mod details;

pub use blocks::BlockRepository;
pub use counters::{CountableRecord, Counter, CounterRepository};
pub use details::{
    BalanceRecord, BalanceRepository, LogRecord, LogRepository, TransactionRecord,
    TransactionRepository, TransferRecord, TransferRepository,
};

use crate::error::DbError;

/// Block numbers are `u64` on chain and `BIGINT` in SQL.
pub(crate) fn to_db_number(n: u64) -> Result<i64, DbError> {
    i64::try_from(n).map_err(|_| DbError::Decode(format!("number {n} exceeds i64")))
}

pub(crate) fn from_db_number(n: i64) -> Result<u64, DbError> {
    u64::try_from(n).map_err(|_| DbError::Decode(format!("negative block number {n}")))
}

/// Table and column names are interpolated into SQL, so only plain
/// identifiers are accepted.
pub(crate) fn check_identifier(name: &str) -> Result<&str, DbError> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(name)
    } else {
        Err(DbError::InvalidIdentifier(name.to_string()))
    }
}
