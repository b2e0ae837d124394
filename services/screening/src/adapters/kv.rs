//! services/screening/src/adapters/kv.rs
//!
//! This module contains the local persistence adapter, which is the concrete
//! implementation of the `KeyValueStore` port from the `core` crate. Every value
//! is JSON text in a single SQLite table, accessed through `sqlx`.

use async_trait::async_trait;
use hemoscan_core::ports::{KeyValueStore, PortError, PortResult};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tokio::sync::Mutex;
use tracing::debug;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A key-value adapter that implements the `KeyValueStore` port on SQLite.
pub struct SqliteKvAdapter {
    pool: SqlitePool,
    /// Serializes read-modify-write list appends issued through this instance.
    list_lock: Mutex<()>,
}

impl SqliteKvAdapter {
    /// Creates a new `SqliteKvAdapter` over an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            list_lock: Mutex::new(()),
        }
    }

    /// Opens a pool for `database_url`.
    ///
    /// An in-memory database lives inside a single connection, so the pool is
    /// pinned to one connection that is never recycled.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(database_url)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?
        };
        Ok(Self::new(pool))
    }

    /// A helper function to create the backing table at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key   TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// `KeyValueStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl KeyValueStore for SqliteKvAdapter {
    async fn insert(&self, key: &str, value: &str) -> PortResult<()> {
        sqlx::query("INSERT INTO kv_store (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(format!("Failed to insert key '{}': {}", key, e)))?;
        Ok(())
    }

    async fn find_by_key(&self, key: &str) -> PortResult<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)
    }

    async fn update(&self, key: &str, value: &str) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO kv_store (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn append_to_list(&self, key: &str, item: &str) -> PortResult<()> {
        let item: Value = serde_json::from_str(item)
            .map_err(|e| PortError::Unexpected(format!("List item is not JSON: {}", e)))?;

        let _guard = self.list_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let current = sqlx::query_scalar::<_, String>("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(unexpected)?;

        let mut items = match current {
            Some(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Array(items)) => items,
                Ok(_) => {
                    return Err(PortError::Unexpected(format!(
                        "Key '{}' does not hold a list",
                        key
                    )))
                }
                Err(e) => return Err(PortError::Unexpected(e.to_string())),
            },
            None => Vec::new(),
        };
        items.push(item);
        debug!(key, len = items.len(), "Appending to list");

        sqlx::query(
            "INSERT INTO kv_store (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(Value::Array(items).to_string())
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn read_list(&self, key: &str) -> PortResult<Vec<String>> {
        let Some(text) = self.find_by_key(key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Array(items)) => Ok(items.iter().map(Value::to_string).collect()),
            Ok(_) => Err(PortError::Unexpected(format!(
                "Key '{}' does not hold a list",
                key
            ))),
            Err(e) => Err(PortError::Unexpected(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn adapter() -> SqliteKvAdapter {
        let kv = SqliteKvAdapter::connect("sqlite::memory:").await.unwrap();
        kv.run_migrations().await.unwrap();
        kv
    }

    #[tokio::test]
    async fn insert_rejects_existing_key() {
        let kv = adapter().await;
        kv.insert("k", "1").await.unwrap();
        assert!(kv.insert("k", "2").await.is_err());
        assert_eq!(kv.find_by_key("k").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn update_upserts_and_remove_is_idempotent() {
        let kv = adapter().await;
        kv.update("k", "\"a\"").await.unwrap();
        kv.update("k", "\"b\"").await.unwrap();
        assert_eq!(kv.find_by_key("k").await.unwrap().as_deref(), Some("\"b\""));
        kv.remove("k").await.unwrap();
        kv.remove("k").await.unwrap();
        assert_eq!(kv.find_by_key("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lists_keep_insertion_order() {
        let kv = adapter().await;
        assert!(kv.read_list("l").await.unwrap().is_empty());
        for i in 0..4 {
            kv.append_to_list("l", &format!("{{\"n\":{}}}", i)).await.unwrap();
        }
        let items = kv.read_list("l").await.unwrap();
        assert_eq!(items, vec![r#"{"n":0}"#, r#"{"n":1}"#, r#"{"n":2}"#, r#"{"n":3}"#]);
    }

    #[tokio::test]
    async fn append_refuses_non_list_values() {
        let kv = adapter().await;
        kv.update("scalar", "42").await.unwrap();
        assert!(kv.append_to_list("scalar", "1").await.is_err());
        assert!(kv.read_list("scalar").await.is_err());
    }
}
