//! Warehouse store trait and the SQLite implementation handle.

use crate::error::WarehouseResult;
use crate::repos::{
    ChangeLogRepo, CubeFileRepo, DictionaryRepo, MetadataFileRepo, RegistryRepo, SpineFileRepo,
    SpineRepo,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined warehouse store trait.
#[async_trait]
pub trait WarehouseStore:
    SpineFileRepo
    + CubeFileRepo
    + MetadataFileRepo
    + ChangeLogRepo
    + SpineRepo
    + DictionaryRepo
    + RegistryRepo
    + Send
    + Sync
{
    /// Apply the embedded schema.
    async fn migrate(&self) -> WarehouseResult<()>;

    /// Check database connectivity.
    async fn health_check(&self) -> WarehouseResult<()>;
}

/// SQLite-backed warehouse store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if necessary) a warehouse at the given path.
    pub async fn open(path: impl AsRef<Path>) -> WarehouseResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    sqlx::Error::Io(std::io::Error::new(
                        e.kind(),
                        format!("cannot create database directory: {e}"),
                    ))
                })?;
            }
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // SQLite permits limited write concurrency; a single pooled
        // connection avoids "database is locked" failures under the
        // fetch worker pools.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

/// Warehouse schema (embedded).
const SCHEMA: &str = include_str!("schema.sql");

fn schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

#[async_trait]
impl WarehouseStore for SqliteStore {
    async fn migrate(&self) -> WarehouseResult<()> {
        for statement in schema_statements(SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> WarehouseResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
