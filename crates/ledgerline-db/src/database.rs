//! Pool construction, backend detection and schema bootstrap.

use std::fmt;

use sqlx::AnyConnection;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Connection};
use tracing::{debug, info};

use crate::error::DbError;
use crate::unit_of_work::UnitOfWork;

const SQLITE_SCHEMA: &str = include_str!("../migrations/001_initial.sql");
const POSTGRES_SCHEMA: &str = include_str!("../migrations/001_initial_pg.sql");

/// SQL engines the bundled schema supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    /// Map a driver's `backend_name()` to a supported backend.
    pub fn from_name(name: &str) -> Result<Self, DbError> {
        match name {
            "SQLite" => Ok(Self::Sqlite),
            "PostgreSQL" => Ok(Self::Postgres),
            other => Err(DbError::UnsupportedBackend(other.to_string())),
        }
    }

    pub fn schema(&self) -> &'static str {
        match self {
            Self::Sqlite => SQLITE_SCHEMA,
            Self::Postgres => POSTGRES_SCHEMA,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite => f.write_str("sqlite"),
            Self::Postgres => f.write_str("postgres"),
        }
    }
}

/// Handle to the indexer database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: AnyPool,
    backend: Backend,
}

impl Database {
    /// Connect to `url` (`sqlite:` or `postgres:`) and apply the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, DbError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .after_connect(|conn, _meta| Box::pin(async move { enable_foreign_keys(conn).await }))
            .connect(url)
            .await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool. The default sqlx drivers must already be
    /// installed.
    pub async fn from_pool(pool: AnyPool) -> Result<Self, DbError> {
        let conn = pool.acquire().await?;
        let backend = Backend::from_name(conn.backend_name())?;
        drop(conn);

        sqlx::raw_sql(backend.schema()).execute(&pool).await?;
        info!(%backend, "database schema ready");
        Ok(Self { pool, backend })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Unit of work sharing this database's pool.
    pub fn unit_of_work(&self) -> UnitOfWork {
        UnitOfWork::new(self.pool.clone(), self.backend)
    }

    pub async fn ping(&self) -> Result<(), DbError> {
        let mut conn = self.pool.acquire().await?;
        conn.ping().await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        debug!("database pool closed");
    }
}

/// SQLite ships with foreign keys off; cascading deletes need them per connection.
async fn enable_foreign_keys(conn: &mut AnyConnection) -> Result<(), sqlx::Error> {
    if conn.backend_name() == "SQLite" {
        sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names() {
        assert_eq!(Backend::from_name("SQLite").unwrap(), Backend::Sqlite);
        assert_eq!(Backend::from_name("PostgreSQL").unwrap(), Backend::Postgres);
        assert!(matches!(Backend::from_name("MySQL"), Err(DbError::UnsupportedBackend(_))));
    }

    #[test]
    fn both_schemas_define_every_table() {
        for backend in [Backend::Sqlite, Backend::Postgres] {
            for table in ["blocks", "transactions", "logs", "transfers", "balances", "counters", "counter_states"] {
                assert!(
                    backend.schema().contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                    "{backend} schema lacks {table}"
                );
            }
            assert_eq!(backend.schema().matches("ON DELETE CASCADE").count(), 4);
        }
    }

    /// Body of `CREATE TABLE {table}` up to its closing `);`.
    fn table_definition(schema: &str, table: &str) -> String {
        let header = format!("CREATE TABLE IF NOT EXISTS {table} (");
        let start = schema.find(&header).unwrap();
        let body = &schema[start..];
        body[..body.find(");").unwrap()].to_string()
    }

    #[test]
    fn block_dependent_tables_cascade_from_blocks() {
        for backend in [Backend::Sqlite, Backend::Postgres] {
            let schema = backend.schema();
            for table in ["transactions", "logs", "transfers", "balances"] {
                assert!(
                    table_definition(schema, table).contains("REFERENCES blocks (number) ON DELETE CASCADE"),
                    "{backend} {table} does not cascade from blocks"
                );
            }
            for table in ["blocks", "counters", "counter_states"] {
                assert!(
                    !table_definition(schema, table).contains("ON DELETE CASCADE"),
                    "{backend} {table} should not cascade"
                );
            }
        }
    }

    #[tokio::test]
    async fn connects_to_sqlite_with_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("db.sqlite").display());
        let db = Database::connect(&url, 2).await.unwrap();
        assert_eq!(db.backend(), Backend::Sqlite);
        db.ping().await.unwrap();

        let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys").fetch_one(db.pool()).await.unwrap();
        assert_eq!(enabled, 1);
        db.close().await;
    }
}
