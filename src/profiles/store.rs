use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::debug;

use crate::AppResult;

/// String-keyed local persistent state, one row per key.
#[derive(Debug, Clone)]
pub struct LocalStore {
    db_pool: SqlitePool,
}

impl LocalStore {
    pub async fn connect(url: &str) -> AppResult<LocalStore> {
        let mut options = SqlitePoolOptions::new().max_connections(4);
        if url.contains(":memory:") {
            // An in-memory database lives and dies with its one connection.
            options = options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let db_pool = options.connect(url).await?;
        sqlx::query("CREATE TABLE IF NOT EXISTS local_storage (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL)")
            .execute(&db_pool)
            .await?;
        debug!(url, "local store ready");
        Ok(LocalStore { db_pool })
    }

    pub async fn in_memory() -> AppResult<LocalStore> {
        Self::connect("sqlite::memory:").await
    }

    pub async fn get_item(&self, key: &str) -> AppResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM local_storage WHERE key=?")
            .bind(key)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    pub async fn set_item(&self, key: &str, value: &str) -> AppResult<()> {
        sqlx::query("INSERT INTO local_storage (key,value) VALUES (?,?) ON CONFLICT(key) DO UPDATE SET value=excluded.value")
            .bind(key)
            .bind(value)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    pub async fn remove_item(&self, key: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM local_storage WHERE key=?")
            .bind(key)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    /// Removes every key, not just this crate's.
    pub async fn clear(&self) -> AppResult<()> {
        sqlx::query("DELETE FROM local_storage")
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    pub async fn keys(&self) -> AppResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT key FROM local_storage ORDER BY key")
            .fetch_all(&self.db_pool)
            .await?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }
}
