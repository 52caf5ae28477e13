//! Persistence contract.
//!
//! Bots store raw bytes in named tables. A missing table and a missing key
//! are reported as distinct errors so callers can tell "never written" from
//! "not written under this key". Errors are returned as-is; nothing retries.
//!
//! Two backends ship with the core: [`NoopStore`] for bots without storage and
//! [`MemoryStore`] for tests and short-lived bots.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::foundation::error::{StoreError, StoreResult};

/// Key-value persistence backend.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, table: &str, key: &str) -> StoreResult<Vec<u8>>;

    async fn set(&self, table: &str, key: &str, value: Vec<u8>) -> StoreResult<()>;

    async fn delete(&self, table: &str, key: &str) -> StoreResult<()>;

    /// All keys of `table`.
    async fn list(&self, table: &str) -> StoreResult<Vec<String>>;

    /// Keys of `table` starting with `prefix`.
    async fn list_prefix(&self, table: &str, prefix: &str) -> StoreResult<Vec<String>>;

    /// Releases the backend. The runtime calls this once, during shutdown.
    async fn close(&self) -> StoreResult<()>;
}

/// Shared store handle.
pub type BoxedStore = Arc<dyn Store>;

/// JSON helpers on top of any [`Store`].
#[async_trait]
pub trait StoreExt: Store {
    async fn get_json<T>(&self, table: &str, key: &str) -> StoreResult<T>
    where
        T: DeserializeOwned,
    {
        let bytes = self.get(table, key).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn set_json<T>(&self, table: &str, key: &str, value: &T) -> StoreResult<()>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value)?;
        self.set(table, key, bytes).await
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

// =============================================================================
// NoopStore
// =============================================================================

/// Store that keeps nothing. Every lookup misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStore;

#[async_trait]
impl Store for NoopStore {
    async fn get(&self, table: &str, key: &str) -> StoreResult<Vec<u8>> {
        Err(StoreError::key_not_found(table, key))
    }

    async fn set(&self, _table: &str, _key: &str, _value: Vec<u8>) -> StoreResult<()> {
        Ok(())
    }

    async fn delete(&self, _table: &str, _key: &str) -> StoreResult<()> {
        Ok(())
    }

    async fn list(&self, _table: &str) -> StoreResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn list_prefix(&self, _table: &str, _prefix: &str) -> StoreResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

// =============================================================================
// MemoryStore
// =============================================================================

/// In-memory store. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, table: &str, key: &str) -> StoreResult<Vec<u8>> {
        let tables = self.tables.lock();
        let rows = tables
            .get(table)
            .ok_or_else(|| StoreError::table_not_found(table))?;
        rows.get(key)
            .cloned()
            .ok_or_else(|| StoreError::key_not_found(table, key))
    }

    async fn set(&self, table: &str, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.tables
            .lock()
            .entry(table.to_owned())
            .or_default()
            .insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, table: &str, key: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::table_not_found(table))?;
        rows.remove(key);
        Ok(())
    }

    async fn list(&self, table: &str) -> StoreResult<Vec<String>> {
        self.list_prefix(table, "").await
    }

    async fn list_prefix(&self, table: &str, prefix: &str) -> StoreResult<Vec<String>> {
        let tables = self.tables.lock();
        let rows = tables
            .get(table)
            .ok_or_else(|| StoreError::table_not_found(table))?;
        Ok(rows
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[tokio::test]
    async fn noop_store_misses_by_key() {
        let store = NoopStore;
        store.set("t", "k", b"v".to_vec()).await.unwrap();
        assert_eq!(
            store.get("t", "k").await,
            Err(StoreError::key_not_found("t", "k"))
        );
        assert!(store.list("t").await.unwrap().is_empty());
        assert!(store.close().await.is_ok());
    }

    #[tokio::test]
    async fn memory_store_tells_table_from_key() {
        let store = MemoryStore::new();
        assert_eq!(
            store.get("users", "alice").await,
            Err(StoreError::table_not_found("users"))
        );

        store.set("users", "bob", b"1".to_vec()).await.unwrap();
        assert_eq!(
            store.get("users", "alice").await,
            Err(StoreError::key_not_found("users", "alice"))
        );
        assert_eq!(store.get("users", "bob").await.unwrap(), b"1");
    }

    #[tokio::test]
    async fn memory_store_lists_sorted_prefixes() {
        let store = MemoryStore::new();
        for key in ["team:b", "team:a", "user:x"] {
            store.set("kv", key, Vec::new()).await.unwrap();
        }
        assert_eq!(
            store.list_prefix("kv", "team:").await.unwrap(),
            vec!["team:a", "team:b"]
        );
        assert_eq!(store.list("kv").await.unwrap().len(), 3);

        store.delete("kv", "team:a").await.unwrap();
        store.delete("kv", "missing").await.unwrap();
        assert_eq!(store.list_prefix("kv", "team:").await.unwrap(), vec!["team:b"]);
        assert!(store.delete("nope", "k").await.is_err());
    }

    #[tokio::test]
    async fn json_helpers_work_through_trait_objects() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Karma {
            points: i64,
        }

        let store: BoxedStore = Arc::new(MemoryStore::new());
        store
            .set_json("karma", "alice", &Karma { points: 3 })
            .await
            .unwrap();
        let karma: Karma = store.get_json("karma", "alice").await.unwrap();
        assert_eq!(karma, Karma { points: 3 });

        store.set("karma", "bob", b"not json".to_vec()).await.unwrap();
        let garbled: StoreResult<Karma> = store.get_json("karma", "bob").await;
        assert!(matches!(garbled, Err(StoreError::Codec(_))));
    }
}
