//! Ambient database transactions.
//!
//! [`UnitOfWork::use_transaction`] opens a transaction on a fresh pooled
//! connection and binds it as the *transaction context* of the action it
//! runs. Every repository call made while that action is being polled, at
//! any depth, resolves its executor through
//! [`UnitOfWork::transaction_manager`] and therefore lands in the same
//! transaction without the handle being passed around.
//!
//! The context is a tokio task-local: it follows the future, not the OS
//! thread, so two transactions interleaved on one runtime thread never see
//! each other's context. Tasks started with `tokio::spawn` inside an action
//! do not inherit it and run against the pool.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use sqlx::any::{AnyArguments, AnyQueryResult, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use ledgerline_core::metrics::{DB_COMMIT_DURATION, DurationTimer};
use ledgerline_core::types::IsolationLevel;

use crate::database::Backend;
use crate::error::DbError;

tokio::task_local! {
    static TRANSACTION_CONTEXT: TransactionManager;
}

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

type AnyQuery<'q> = Query<'q, Any, AnyArguments<'q>>;

/// How [`UnitOfWork::use_transaction`] should run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Leave the transaction open after the action succeeds; the caller
    /// finishes it through the returned [`DbTransaction`].
    pub prevent_automatic_commit: bool,
    pub isolation_level: Option<IsolationLevel>,
}

impl TransactionOptions {
    pub fn manual_commit() -> Self {
        Self { prevent_automatic_commit: true, ..Self::default() }
    }

    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }
}

/// Connection held by one transaction context. Emptied on commit or rollback.
pub struct TransactionSlot {
    id: u64,
    tx: Mutex<Option<Transaction<'static, Any>>>,
}

impl TransactionSlot {
    async fn commit(&self) -> Result<(), DbError> {
        let tx = self.tx.lock().await.take().ok_or(DbError::TransactionReleased)?;
        let timer = DurationTimer::start(DB_COMMIT_DURATION);
        let committed = tx.commit().await;
        timer.stop();
        committed?;
        debug!(transaction = self.id, "transaction committed");
        Ok(())
    }

    /// Roll back if still open. Returns whether anything was rolled back.
    async fn rollback(&self) -> Result<bool, DbError> {
        let Some(tx) = self.tx.lock().await.take() else {
            return Ok(false);
        };
        tx.rollback().await?;
        debug!(transaction = self.id, "transaction rolled back");
        Ok(true)
    }
}

/// The executor a repository should use right now: the pool, or the
/// connection of the enclosing transaction context.
#[derive(Clone)]
pub enum TransactionManager {
    Pool(AnyPool),
    Transaction(Arc<TransactionSlot>),
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pool(_) => f.write_str("TransactionManager::Pool"),
            Self::Transaction(slot) => write!(f, "TransactionManager::Transaction({})", slot.id),
        }
    }
}

impl TransactionManager {
    /// Identifier of the transaction context, `None` outside any transaction.
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Pool(_) => None,
            Self::Transaction(slot) => Some(slot.id),
        }
    }

    pub fn is_transactional(&self) -> bool {
        matches!(self, Self::Transaction(_))
    }

    pub async fn execute<'q>(&self, query: AnyQuery<'q>) -> Result<AnyQueryResult, DbError> {
        match self {
            Self::Pool(pool) => Ok(query.execute(pool).await?),
            Self::Transaction(slot) => {
                let mut guard = slot.tx.lock().await;
                let tx = guard.as_mut().ok_or(DbError::TransactionReleased)?;
                Ok(query.execute(&mut **tx).await?)
            }
        }
    }

    pub async fn fetch_one<'q>(&self, query: AnyQuery<'q>) -> Result<AnyRow, DbError> {
        match self {
            Self::Pool(pool) => Ok(query.fetch_one(pool).await?),
            Self::Transaction(slot) => {
                let mut guard = slot.tx.lock().await;
                let tx = guard.as_mut().ok_or(DbError::TransactionReleased)?;
                Ok(query.fetch_one(&mut **tx).await?)
            }
        }
    }

    pub async fn fetch_optional<'q>(&self, query: AnyQuery<'q>) -> Result<Option<AnyRow>, DbError> {
        match self {
            Self::Pool(pool) => Ok(query.fetch_optional(pool).await?),
            Self::Transaction(slot) => {
                let mut guard = slot.tx.lock().await;
                let tx = guard.as_mut().ok_or(DbError::TransactionReleased)?;
                Ok(query.fetch_optional(&mut **tx).await?)
            }
        }
    }

    pub async fn fetch_all<'q>(&self, query: AnyQuery<'q>) -> Result<Vec<AnyRow>, DbError> {
        match self {
            Self::Pool(pool) => Ok(query.fetch_all(pool).await?),
            Self::Transaction(slot) => {
                let mut guard = slot.tx.lock().await;
                let tx = guard.as_mut().ok_or(DbError::TransactionReleased)?;
                Ok(query.fetch_all(&mut **tx).await?)
            }
        }
    }
}

/// Outcome of [`UnitOfWork::use_transaction`].
///
/// With automatic commit the transaction is already committed and the
/// connection released. With `prevent_automatic_commit` it stays open until
/// [`commit`](Self::commit) or
/// [`ensure_rollback_if_not_committed`](Self::ensure_rollback_if_not_committed);
/// dropping every handle to an open transaction rolls it back.
pub struct DbTransaction<T> {
    output: T,
    slot: Arc<TransactionSlot>,
}

impl<T: fmt::Debug> fmt::Debug for DbTransaction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbTransaction")
            .field("id", &self.slot.id)
            .field("output", &self.output)
            .finish()
    }
}

impl<T> DbTransaction<T> {
    pub fn id(&self) -> u64 {
        self.slot.id
    }

    /// What the action returned.
    pub fn output(&self) -> &T {
        &self.output
    }

    pub fn into_output(self) -> T {
        self.output
    }

    /// Whether the transaction is still open.
    pub async fn is_pending(&self) -> bool {
        self.slot.tx.lock().await.is_some()
    }

    /// Run more work inside this (still open) transaction context.
    pub async fn scope<F: Future>(&self, work: F) -> F::Output {
        TRANSACTION_CONTEXT
            .scope(TransactionManager::Transaction(Arc::clone(&self.slot)), work)
            .await
    }

    /// Commit a transaction opened with `prevent_automatic_commit`.
    ///
    /// Fails with [`DbError::TransactionReleased`] if it was already
    /// committed or rolled back.
    pub async fn commit(&self) -> Result<(), DbError> {
        self.slot.commit().await
    }

    /// Roll back unless already finished. Safe to call any number of times.
    pub async fn ensure_rollback_if_not_committed(&self) -> Result<(), DbError> {
        self.slot.rollback().await.map(|_| ())
    }
}

/// Entry point for transactional work over one pool.
#[derive(Debug, Clone)]
pub struct UnitOfWork {
    pool: AnyPool,
    backend: Backend,
}

impl UnitOfWork {
    pub fn new(pool: AnyPool, backend: Backend) -> Self {
        Self { pool, backend }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Executor bound to the caller's transaction context, or the pool.
    pub fn transaction_manager(&self) -> TransactionManager {
        TRANSACTION_CONTEXT
            .try_with(TransactionManager::clone)
            .unwrap_or_else(|_| TransactionManager::Pool(self.pool.clone()))
    }

    /// Run `action` inside a new transaction context.
    ///
    /// On error the transaction is rolled back and the error returned. On
    /// success it is committed, unless `prevent_automatic_commit` is set.
    /// A nested call opens an independent transaction on its own connection.
    pub async fn use_transaction<F, Fut, T, E>(
        &self,
        action: F,
        options: TransactionOptions,
    ) -> Result<DbTransaction<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DbError>,
    {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        if let Some(level) = options.isolation_level {
            self.apply_isolation_level(&mut tx, level).await?;
        }

        let slot = Arc::new(TransactionSlot {
            id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
            tx: Mutex::new(Some(tx)),
        });
        debug!(transaction = slot.id, "transaction started");

        let context = TransactionManager::Transaction(Arc::clone(&slot));
        let outcome = TRANSACTION_CONTEXT.scope(context, async move { action().await }).await;

        let output = match outcome {
            Ok(output) => output,
            Err(e) => {
                if let Err(rollback_err) = slot.rollback().await {
                    error!(transaction = slot.id, error = %rollback_err, "rollback failed");
                }
                warn!(transaction = slot.id, "transaction action failed, rolled back");
                return Err(e);
            }
        };

        if !options.prevent_automatic_commit {
            slot.commit().await?;
        }
        Ok(DbTransaction { output, slot })
    }

    async fn apply_isolation_level(
        &self,
        tx: &mut Transaction<'static, Any>,
        level: IsolationLevel,
    ) -> Result<(), DbError> {
        match self.backend {
            Backend::Postgres => {
                let sql = format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql());
                sqlx::query(&sql).execute(&mut **tx).await?;
            }
            Backend::Sqlite => {
                debug!(%level, "SQLite transactions are serializable, isolation level ignored");
            }
        }
        Ok(())
    }
}
