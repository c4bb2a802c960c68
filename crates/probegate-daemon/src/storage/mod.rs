//! Shared state store: async maps and counters.
//!
//! The gateway never talks to a concrete store directly. All shared state
//! goes through the [`StorageBackend`] contract — string-named maps of
//! JSON values plus named atomic counters — so standalone and clustered
//! deployments are interchangeable. [`SharedMap`] and [`SharedCounter`]
//! add typed, serde-backed handles over the raw contract.
//!
//! # Contract
//!
//! - Every operation is asynchronous and may fail with [`StorageError`].
//! - Operations on the same key from concurrent callers are serialized by
//!   the backend (no lost updates on single-key operations).
//! - There are NO multi-key transactions. Composite invariants (for
//!   example "remove from the active-probes map implies decrement the
//!   fleet counter") are the caller's responsibility and are not atomic
//!   across the two operations.

mod memory;

pub mod expiring;

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryStorage;

/// Errors from shared state operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A backend operation failed.
    #[error("storage operation {op} on '{target}' failed: {reason}")]
    Operation {
        /// Operation name (`get`, `put`, `remove`, ...).
        op: &'static str,
        /// Map or counter name, plus key where applicable.
        target: String,
        /// Backend-reported reason.
        reason: String,
    },

    /// A key or value could not be (de)serialized.
    #[error("storage serialization for '{target}' failed: {source}")]
    Serialization {
        /// Map or counter name.
        target: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Raw contract over keyed maps and counters.
///
/// Keys are pre-serialized strings; values are JSON. Implementations must
/// serialize concurrent operations on the same key.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Get a value from a named map.
    async fn map_get(&self, map: &str, key: &str) -> StorageResult<Option<Value>>;

    /// Put a value into a named map.
    async fn map_put(&self, map: &str, key: &str, value: Value) -> StorageResult<()>;

    /// Remove a key from a named map, returning the previous value.
    async fn map_remove(&self, map: &str, key: &str) -> StorageResult<Option<Value>>;

    /// Number of entries in a named map.
    async fn map_size(&self, map: &str) -> StorageResult<usize>;

    /// All entries of a named map.
    async fn map_entries(&self, map: &str) -> StorageResult<Vec<(String, Value)>>;

    /// Atomically add `delta` to a named counter, returning the new value.
    async fn counter_add(&self, name: &str, delta: i64) -> StorageResult<i64>;

    /// Current value of a named counter (0 if never touched).
    async fn counter_get(&self, name: &str) -> StorageResult<i64>;
}

/// Handle to a shared state store.
///
/// Cheap to clone; all clones share the same backend.
#[derive(Clone)]
pub struct SharedStorage {
    backend: Arc<dyn StorageBackend>,
}

impl SharedStorage {
    /// Wrap a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// In-memory storage for standalone mode.
    #[must_use]
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Typed handle to the named map.
    #[must_use]
    pub fn map<K, V>(&self, name: &str) -> SharedMap<K, V>
    where
        K: Serialize + DeserializeOwned,
        V: Serialize + DeserializeOwned,
    {
        SharedMap {
            backend: Arc::clone(&self.backend),
            name: name.to_string(),
            _marker: PhantomData,
        }
    }

    /// Handle to the named counter.
    #[must_use]
    pub fn counter(&self, name: &str) -> SharedCounter {
        SharedCounter {
            backend: Arc::clone(&self.backend),
            name: name.to_string(),
        }
    }
}

fn encode_key<K: Serialize>(name: &str, key: &K) -> StorageResult<String> {
    serde_json::to_string(key).map_err(|source| StorageError::Serialization {
        target: name.to_string(),
        source,
    })
}

/// Typed async map over a [`StorageBackend`].
///
/// Keys and values are serde-encoded; keys use their canonical JSON
/// encoding so independently constructed handles agree on key identity.
pub struct SharedMap<K, V> {
    backend: Arc<dyn StorageBackend>,
    name: String,
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V> Clone for SharedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<K, V> SharedMap<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    /// Map name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the value for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails or the stored value
    /// does not deserialize as `V`.
    pub async fn get(&self, key: &K) -> StorageResult<Option<V>> {
        let raw_key = encode_key(&self.name, key)?;
        let value = self.backend.map_get(&self.name, &raw_key).await?;
        value
            .map(|v| {
                serde_json::from_value(v).map_err(|source| StorageError::Serialization {
                    target: format!("{}[{raw_key}]", self.name),
                    source,
                })
            })
            .transpose()
    }

    /// Put a value for `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if serialization or the backend fails.
    pub async fn put(&self, key: &K, value: &V) -> StorageResult<()> {
        let raw_key = encode_key(&self.name, key)?;
        let raw_value =
            serde_json::to_value(value).map_err(|source| StorageError::Serialization {
                target: self.name.clone(),
                source,
            })?;
        self.backend.map_put(&self.name, &raw_key, raw_value).await
    }

    /// Remove `key`, returning the previous value if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails or the removed value
    /// does not deserialize as `V`.
    pub async fn remove(&self, key: &K) -> StorageResult<Option<V>> {
        let raw_key = encode_key(&self.name, key)?;
        let value = self.backend.map_remove(&self.name, &raw_key).await?;
        value
            .map(|v| {
                serde_json::from_value(v).map_err(|source| StorageError::Serialization {
                    target: format!("{}[{raw_key}]", self.name),
                    source,
                })
            })
            .transpose()
    }

    /// Number of entries.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn size(&self) -> StorageResult<usize> {
        self.backend.map_size(&self.name).await
    }

    /// All entries. Entries that fail to deserialize are skipped; the
    /// shared map may legitimately outlive a type revision in clustered
    /// mode.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn entries(&self) -> StorageResult<Vec<(K, V)>> {
        let raw = self.backend.map_entries(&self.name).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(raw_key, raw_value)| {
                let key = serde_json::from_str(&raw_key).ok()?;
                let value = serde_json::from_value(raw_value).ok()?;
                Some((key, value))
            })
            .collect())
    }
}

/// Named atomic counter over a [`StorageBackend`].
///
/// Cluster-wide when the backend is clustered. Never clamped: correct
/// usage pairs every decrement with a prior increment.
#[derive(Clone)]
pub struct SharedCounter {
    backend: Arc<dyn StorageBackend>,
    name: String,
}

impl SharedCounter {
    /// Counter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Atomically increment and return the new value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn increment_and_get(&self) -> StorageResult<i64> {
        self.backend.counter_add(&self.name, 1).await
    }

    /// Atomically decrement and return the new value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn decrement_and_get(&self) -> StorageResult<i64> {
        self.backend.counter_add(&self.name, -1).await
    }

    /// Current value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn get(&self) -> StorageResult<i64> {
        self.backend.counter_get(&self.name).await
    }
}
