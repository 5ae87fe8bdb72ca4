//! Database error type.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sqlx error: {0}")] Sqlx(#[from] sqlx::Error),
    #[error("transaction connection already released")] TransactionReleased,
    #[error("unsupported database backend: {0}")] UnsupportedBackend(String),
    #[error("invalid identifier: {0}")] InvalidIdentifier(String),
    #[error("decode: {0}")] Decode(String),
}
