use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::StoreError;

/// Single-writer embedded store (§4.1). Owns the pool and schema migration;
/// every multi-row mutation goes through `in_transaction`.
#[derive(Clone)]
pub struct Store {
    pub pool: SqlitePool,
}

impl Store {
    /// Creates `data_dir` if absent, opens `chkd.db` inside it in WAL mode,
    /// and applies pending migrations.
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|e| StoreError::Io(sqlx::Error::Io(e)))?;

        let db_path = data_dir.join("chkd.db");
        tracing::info!(path = %db_path.display(), "opening store");

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Corruption(e.to_string()))?;

        Ok(Self { pool })
    }

    /// In-memory store for tests: same schema, no filesystem footprint.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(StoreError::from_sqlx)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Corruption(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Runs `f` inside a single exclusive write transaction, rolling back on
    /// any `Err`. The engine must not nest calls to this (§4.1).
    pub async fn in_transaction<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: for<'c> FnOnce(
            &'c mut Transaction<'_, Sqlite>,
        ) -> futures::future::BoxFuture<'c, Result<T, StoreError>>,
    {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await.map_err(StoreError::from_sqlx)?;
                Ok(value)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }
}
