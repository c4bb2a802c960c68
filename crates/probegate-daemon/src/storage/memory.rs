//! In-memory storage backend for standalone mode.
//!
//! Single-key serialization is provided by dashmap's per-entry locking:
//! concurrent `counter_add` calls on the same name and concurrent map
//! operations on the same key go through the same shard lock, so no
//! updates are lost. Cross-key atomicity is intentionally absent, matching
//! the storage contract.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::{StorageBackend, StorageResult};

/// In-memory [`StorageBackend`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    maps: DashMap<String, DashMap<String, Value>>,
    counters: DashMap<String, i64>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, name: &str) -> dashmap::mapref::one::Ref<'_, String, DashMap<String, Value>> {
        self.maps.entry(name.to_string()).or_default().downgrade()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn map_get(&self, map: &str, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.map(map).get(key).map(|entry| entry.value().clone()))
    }

    async fn map_put(&self, map: &str, key: &str, value: Value) -> StorageResult<()> {
        self.map(map).insert(key.to_string(), value);
        Ok(())
    }

    async fn map_remove(&self, map: &str, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.map(map).remove(key).map(|(_, value)| value))
    }

    async fn map_size(&self, map: &str) -> StorageResult<usize> {
        Ok(self.map(map).len())
    }

    async fn map_entries(&self, map: &str) -> StorageResult<Vec<(String, Value)>> {
        Ok(self
            .map(map)
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    async fn counter_add(&self, name: &str, delta: i64) -> StorageResult<i64> {
        let mut entry = self.counters.entry(name.to_string()).or_insert(0);
        *entry += delta;
        Ok(*entry)
    }

    async fn counter_get(&self, name: &str) -> StorageResult<i64> {
        Ok(self.counters.get(name).map_or(0, |entry| *entry))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn untouched_counter_reads_zero() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.counter_get("never").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_returns_previous_value() {
        let storage = MemoryStorage::new();
        storage.map_put("m", "k", json!(7)).await.unwrap();
        assert_eq!(storage.map_remove("m", "k").await.unwrap(), Some(json!(7)));
        assert_eq!(storage.map_remove("m", "k").await.unwrap(), None);
    }
}
