//! Generic TTL-expiring cache over two shared maps.
//!
//! [`ExpiringSharedData`] wraps a backing map (values) and an expiration
//! map (last-touch timestamps in monotonic nanoseconds), both namespaced
//! from a caller-supplied identifier so independent caches never collide
//! on one shared store:
//!
//! ```text
//! expiring_shared_data:{id}:backing_map
//! expiring_shared_data:{id}:expiration_map
//! ```
//!
//! # Expiry policy
//!
//! Exactly one of `expire_after_write` / `expire_after_access` may be
//! configured (or neither, which never expires). Configuring both is a
//! build-time error: the two policies have ambiguous precedence and no
//! caller legitimately wants both.
//!
//! # Non-atomicity
//!
//! The two-map split means transient windows exist where a key has
//! expired by policy but has not yet been purged. Callers must tolerate
//! one stale read before the next sweep or explicit access.
//!
//! # Sweep
//!
//! Every cache instance runs a background sweep on a fixed 5 second
//! period. Sweep failures are logged and swallowed; the next tick rescans
//! from scratch with no partial-state bookkeeping. Explicit operations
//! (`get_if_present`, `put`, `compute`) also trigger a lazy sweep first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::{SharedMap, SharedStorage, StorageResult};

/// Fixed sweep period.
const SWEEP_PERIOD: Duration = Duration::from_secs(5);

/// Monotonic time source for expiry bookkeeping.
///
/// Injectable so tests can drive expiry without sleeping.
pub trait TimeSource: Send + Sync {
    /// Nanoseconds elapsed on this source's monotonic timeline.
    fn now_nanos(&self) -> u64;
}

/// Production time source backed by [`Instant`].
#[derive(Debug)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    /// Create a clock anchored at construction time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    fn now_nanos(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Manually advanced time source for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    /// Create a clock at instant zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock.
    pub fn advance(&self, by: Duration) {
        self.nanos
            .fetch_add(u64::try_from(by.as_nanos()).unwrap_or(u64::MAX), Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now_nanos(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

/// Error building an expiring cache.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExpiryConfigError {
    /// Both expiry policies were configured.
    #[error("expire_after_write and expire_after_access are mutually exclusive")]
    BothPoliciesSet,
}

#[derive(Debug, Clone, Copy)]
enum ExpiryPolicy {
    /// Entries never expire.
    None,
    /// Expire `nanos` after the last write.
    AfterWrite(u64),
    /// Expire `nanos` after the last access or write.
    AfterAccess(u64),
}

impl ExpiryPolicy {
    const fn threshold_nanos(self) -> Option<u64> {
        match self {
            Self::None => None,
            Self::AfterWrite(nanos) | Self::AfterAccess(nanos) => Some(nanos),
        }
    }

    const fn refresh_on_access(self) -> bool {
        matches!(self, Self::AfterAccess(_))
    }
}

/// Builder for [`ExpiringSharedData`].
#[derive(Default)]
pub struct ExpiringSharedDataBuilder {
    expire_after_write: Option<Duration>,
    expire_after_access: Option<Duration>,
    time_source: Option<Arc<dyn TimeSource>>,
}

impl ExpiringSharedDataBuilder {
    /// Expire entries a fixed duration after their last write.
    #[must_use]
    pub fn expire_after_write(mut self, duration: Duration) -> Self {
        self.expire_after_write = Some(duration);
        self
    }

    /// Expire entries a fixed duration after their last access or write.
    #[must_use]
    pub fn expire_after_access(mut self, duration: Duration) -> Self {
        self.expire_after_access = Some(duration);
        self
    }

    /// Override the time source. Tests use [`ManualClock`].
    #[must_use]
    pub fn time_source(mut self, source: Arc<dyn TimeSource>) -> Self {
        self.time_source = Some(source);
        self
    }

    /// Build a cache namespaced by `map_id` over `storage`.
    ///
    /// Spawns the background sweep task; the task stops when the returned
    /// cache is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ExpiryConfigError::BothPoliciesSet`] if both expiry
    /// policies were configured.
    pub fn build<K, V>(
        self,
        map_id: &str,
        storage: &SharedStorage,
    ) -> Result<ExpiringSharedData<K, V>, ExpiryConfigError>
    where
        K: Serialize + DeserializeOwned + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let policy = match (self.expire_after_write, self.expire_after_access) {
            (Some(_), Some(_)) => return Err(ExpiryConfigError::BothPoliciesSet),
            (Some(write), None) => {
                ExpiryPolicy::AfterWrite(u64::try_from(write.as_nanos()).unwrap_or(u64::MAX))
            },
            (None, Some(access)) => {
                ExpiryPolicy::AfterAccess(u64::try_from(access.as_nanos()).unwrap_or(u64::MAX))
            },
            (None, None) => ExpiryPolicy::None,
        };

        let inner = Arc::new(Inner {
            backing: storage.map(&format!("expiring_shared_data:{map_id}:backing_map")),
            expiration: storage.map(&format!("expiring_shared_data:{map_id}:expiration_map")),
            policy,
            time: self
                .time_source
                .unwrap_or_else(|| Arc::new(MonotonicClock::new())),
        });

        let sweeper = tokio::spawn(sweep_loop(Arc::clone(&inner)));
        Ok(ExpiringSharedData { inner, sweeper })
    }
}

struct Inner<K, V> {
    backing: SharedMap<K, V>,
    expiration: SharedMap<K, u64>,
    policy: ExpiryPolicy,
    time: Arc<dyn TimeSource>,
}

/// TTL-expiring cache over two shared maps.
pub struct ExpiringSharedData<K, V> {
    inner: Arc<Inner<K, V>>,
    sweeper: tokio::task::JoinHandle<()>,
}

impl<K, V> Drop for ExpiringSharedData<K, V> {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

impl<K, V> ExpiringSharedData<K, V>
where
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Start building a cache.
    #[must_use]
    pub fn builder() -> ExpiringSharedDataBuilder {
        ExpiringSharedDataBuilder::default()
    }

    /// Get the value for `key` if present and not expired.
    ///
    /// Triggers a lazy sweep first. Under the access policy, a hit
    /// refreshes the entry's timestamp before returning.
    ///
    /// # Errors
    ///
    /// Returns [`super::StorageError`] if the lookup or the timestamp
    /// refresh fails.
    pub async fn get_if_present(&self, key: &K) -> StorageResult<Option<V>> {
        self.inner.lazy_cleanup().await;

        let value = self.inner.backing.get(key).await?;
        if value.is_some() && self.inner.policy.refresh_on_access() {
            let now = self.inner.time.now_nanos();
            self.inner.expiration.put(key, &now).await?;
        }
        Ok(value)
    }

    /// Put a value, (re)arming its expiry under the write policy.
    ///
    /// # Errors
    ///
    /// Returns [`super::StorageError`] if either map write fails. If the
    /// timestamp write fails after the backing write succeeded, the entry
    /// is present without a fresh timestamp until the next `put`.
    pub async fn put(&self, key: &K, value: &V) -> StorageResult<()> {
        self.inner.lazy_cleanup().await;

        self.inner.backing.put(key, value).await?;
        self.inner.arm_expiry(key).await
    }

    /// Read-modify-write: applies `f` to the current value (possibly
    /// absent) and stores the result, refreshing the timestamp under the
    /// write policy.
    ///
    /// # Errors
    ///
    /// Returns [`super::StorageError`] if any underlying operation fails.
    pub async fn compute<F>(&self, key: &K, f: F) -> StorageResult<()>
    where
        F: FnOnce(&K, Option<V>) -> V + Send,
    {
        self.inner.lazy_cleanup().await;

        let current = self.inner.backing.get(key).await?;
        let next = f(key, current);
        self.inner.backing.put(key, &next).await?;
        self.inner.arm_expiry(key).await
    }
}

impl<K, V> Inner<K, V>
where
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn arm_expiry(&self, key: &K) -> StorageResult<()> {
        if matches!(self.policy, ExpiryPolicy::None) {
            return Ok(());
        }
        let now = self.time.now_nanos();
        self.expiration.put(key, &now).await
    }

    /// Sweep from an explicit operation: failures must not fail the
    /// triggering operation, only delay expiry until the next pass.
    async fn lazy_cleanup(&self) {
        if let Err(error) = self.cleanup().await {
            warn!(map = self.backing.name(), %error, "lazy expiry sweep failed");
        }
    }

    async fn cleanup(&self) -> StorageResult<()> {
        let Some(threshold) = self.policy.threshold_nanos() else {
            return Ok(());
        };

        let now = self.time.now_nanos();
        let entries = self.expiration.entries().await?;
        let expired: Vec<K> = entries
            .into_iter()
            .filter(|(_, last_touch)| now.saturating_sub(*last_touch) > threshold)
            .map(|(key, _)| key)
            .collect();

        for key in &expired {
            // Independent removals: a failure on one key is logged and the
            // remaining keys are still attempted.
            if let Err(error) = self.backing.remove(key).await {
                warn!(map = self.backing.name(), %error, "failed to purge expired value");
                continue;
            }
            if let Err(error) = self.expiration.remove(key).await {
                warn!(
                    map = self.expiration.name(),
                    %error,
                    "failed to purge expiration timestamp"
                );
            }
        }
        Ok(())
    }
}

async fn sweep_loop<K, V>(inner: Arc<Inner<K, V>>)
where
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let mut ticker = tokio::time::interval(SWEEP_PERIOD);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match inner.cleanup().await {
            Ok(()) => debug!(map = inner.backing.name(), "expiry sweep completed"),
            Err(error) => {
                warn!(map = inner.backing.name(), %error, "expiry sweep failed");
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clocked_cache(
        builder: ExpiringSharedDataBuilder,
    ) -> (ExpiringSharedData<String, String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let storage = SharedStorage::memory();
        let cache = builder
            .time_source(Arc::clone(&clock) as Arc<dyn TimeSource>)
            .build("test", &storage)
            .unwrap();
        (cache, clock)
    }

    #[tokio::test]
    async fn both_policies_rejected() {
        let storage = SharedStorage::memory();
        let result = ExpiringSharedData::<String, String>::builder()
            .expire_after_write(Duration::from_secs(1))
            .expire_after_access(Duration::from_secs(1))
            .build::<String, String>("conflict", &storage);
        assert_eq!(result.err(), Some(ExpiryConfigError::BothPoliciesSet));
    }

    #[tokio::test]
    async fn put_then_get_before_expiry() {
        let (cache, clock) = clocked_cache(
            ExpiringSharedData::<String, String>::builder()
                .expire_after_write(Duration::from_secs(1)),
        );

        cache.put(&"k".into(), &"v".into()).await.unwrap();
        clock.advance(Duration::from_millis(500));
        assert_eq!(
            cache.get_if_present(&"k".into()).await.unwrap(),
            Some("v".to_string())
        );
    }

    #[tokio::test]
    async fn write_expiry_purges_after_threshold() {
        let (cache, clock) = clocked_cache(
            ExpiringSharedData::<String, String>::builder()
                .expire_after_write(Duration::from_secs(1)),
        );

        cache.put(&"k".into(), &"v".into()).await.unwrap();
        clock.advance(Duration::from_millis(1500));
        assert_eq!(cache.get_if_present(&"k".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn access_refreshes_touch_time() {
        let (cache, clock) = clocked_cache(
            ExpiringSharedData::<String, String>::builder()
                .expire_after_access(Duration::from_secs(2)),
        );

        cache.put(&"k".into(), &"v".into()).await.unwrap();

        // Access at t+1 refreshes the touch time.
        clock.advance(Duration::from_secs(1));
        assert_eq!(
            cache.get_if_present(&"k".into()).await.unwrap(),
            Some("v".to_string())
        );

        // t+2.5 overall, but only 1.5 since the refreshed touch: alive.
        clock.advance(Duration::from_millis(1500));
        assert_eq!(
            cache.get_if_present(&"k".into()).await.unwrap(),
            Some("v".to_string())
        );

        // 2.5 since that last refresh: expired.
        clock.advance(Duration::from_millis(2500));
        assert_eq!(cache.get_if_present(&"k".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn no_policy_never_expires() {
        let (cache, clock) = clocked_cache(ExpiringSharedData::<String, String>::builder());

        cache.put(&"k".into(), &"v".into()).await.unwrap();
        clock.advance(Duration::from_secs(3600));
        assert_eq!(
            cache.get_if_present(&"k".into()).await.unwrap(),
            Some("v".to_string())
        );
    }

    #[tokio::test]
    async fn compute_applies_over_current_value() {
        let (cache, _clock) = clocked_cache(
            ExpiringSharedData::<String, String>::builder()
                .expire_after_write(Duration::from_secs(10)),
        );

        cache
            .compute(&"k".into(), |_, current| {
                assert!(current.is_none());
                "first".to_string()
            })
            .await
            .unwrap();
        cache
            .compute(&"k".into(), |_, current| {
                format!("{}+second", current.unwrap())
            })
            .await
            .unwrap();

        assert_eq!(
            cache.get_if_present(&"k".into()).await.unwrap(),
            Some("first+second".to_string())
        );
    }

    #[tokio::test]
    async fn independent_caches_do_not_collide() {
        let storage = SharedStorage::memory();
        let first: ExpiringSharedData<String, String> = ExpiringSharedData::<String, String>::builder()
            .build("cache-a", &storage)
            .unwrap();
        let second: ExpiringSharedData<String, String> = ExpiringSharedData::<String, String>::builder()
            .build("cache-b", &storage)
            .unwrap();

        first.put(&"k".into(), &"a".into()).await.unwrap();
        second.put(&"k".into(), &"b".into()).await.unwrap();

        assert_eq!(
            first.get_if_present(&"k".into()).await.unwrap(),
            Some("a".to_string())
        );
        assert_eq!(
            second.get_if_present(&"k".into()).await.unwrap(),
            Some("b".to_string())
        );
    }
}
