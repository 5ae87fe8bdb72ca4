//! # ledgerline-db — persistence for the Ledgerline worker.
//!
//! - [`Database`]: pool construction and schema bootstrap (SQLite or PostgreSQL)
//! - [`UnitOfWork`]: ambient transactions bound to the running future
//! - [`repository`]: blocks, block-dependent rows and counters

pub mod database;
pub mod error;
pub mod repository;
pub mod unit_of_work;

pub use database::{Backend, Database};
pub use error::DbError;
pub use unit_of_work::{DbTransaction, TransactionManager, TransactionOptions, UnitOfWork};
