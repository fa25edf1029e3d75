// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The cache-aside engine.

use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use rowcache_tier::CacheStore;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    CacheConfig, Error, Result,
    flight::SharedCalls,
    telemetry::{CacheActivity, CacheOperation, CacheStats, CacheTelemetry},
};

/// Cached in place of a value the backing store reported as missing.
pub(crate) const NOT_FOUND_PLACEHOLDER: &[u8] = b"*";

/// Holds the value decoded by the caller that ran the shared fetch.
type Slot<V> = Arc<Mutex<Option<V>>>;

enum Lookup<V> {
    Hit(V, Bytes),
    Placeholder,
    Miss,
}

/// A cache-aside engine over a [`CacheStore`].
///
/// Values are stored as JSON. Reads that miss run a fetch closure, with concurrent
/// misses on the same key collapsed into one fetch by the shared [`SharedCalls`] group.
/// Fetches that report no row leave a short-lived placeholder so repeated lookups of
/// a missing row do not reach the backing store.
///
/// Clones share the store, the flight group and the stats.
///
/// # Examples
///
/// ```
/// use rowcache::{CacheConfig, RowCache, SharedCalls};
/// use rowcache_tier::testing::MockStore;
///
/// # futures::executor::block_on(async {
/// let cache = RowCache::new(MockStore::new(), &CacheConfig::default(), SharedCalls::new());
///
/// let name: String = cache.take("user:1", || async { Ok(Some("Ada".to_string())) }).await?;
/// assert_eq!(name, "Ada");
///
/// // Served from the store this time.
/// let name: String = cache.take("user:1", || async { Ok(None) }).await?;
/// assert_eq!(name, "Ada");
/// # Ok::<(), rowcache::Error>(())
/// # });
/// ```
pub struct RowCache<S> {
    store: Arc<S>,
    flight: SharedCalls,
    telemetry: CacheTelemetry,
    expiry: Duration,
    not_found_expiry: Duration,
    deviation: f64,
}

impl<S> Clone for RowCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            flight: self.flight.clone(),
            telemetry: self.telemetry.clone(),
            expiry: self.expiry,
            not_found_expiry: self.not_found_expiry,
            deviation: self.deviation,
        }
    }
}

impl<S> fmt::Debug for RowCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowCache")
            .field("name", &self.telemetry.name())
            .field("expiry", &self.expiry)
            .field("not_found_expiry", &self.not_found_expiry)
            .field("deviation", &self.deviation)
            .finish_non_exhaustive()
    }
}

impl<S> RowCache<S>
where
    S: CacheStore + 'static,
{
    /// Creates an engine over `store`, sharing fetches through `flight`.
    #[must_use]
    pub fn new(store: S, config: &CacheConfig, flight: SharedCalls) -> Self {
        Self {
            store: Arc::new(store),
            flight,
            telemetry: CacheTelemetry::new(&config.name),
            expiry: config.expiry,
            not_found_expiry: config.not_found_expiry,
            deviation: config.clamped_deviation(),
        }
    }

    /// Counts every cache event on a `cache.event.count` counter from `meter_provider`.
    ///
    /// The counter carries the cache name, the operation and the activity as attributes.
    #[cfg(any(feature = "metrics", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
    #[must_use]
    pub fn with_meter_provider(self, meter_provider: &dyn opentelemetry::metrics::MeterProvider) -> Self {
        let meter = crate::telemetry::metrics::create_meter(meter_provider);
        Self {
            telemetry: self.telemetry.with_meter(&meter),
            ..self
        }
    }

    /// Returns the configured cache name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.telemetry.name()
    }

    /// Returns the request counters of this cache.
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        self.telemetry.stats()
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the flight group fetches are shared through.
    #[must_use]
    pub fn flight(&self) -> &SharedCalls {
        &self.flight
    }

    /// Returns the base TTL before jitter.
    #[must_use]
    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Returns the cached value under `key`, running `query` on a miss.
    ///
    /// `query` returning `Ok(None)` caches a not-found placeholder and yields a
    /// [`NotFound`](crate::ErrorKind::NotFound) error.
    ///
    /// # Errors
    ///
    /// Returns the error of `query`, a not-found error, or a serialization error.
    /// Store failures never fail the read.
    pub async fn take<V, F, Fut>(&self, key: &str, query: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>>> + Send + 'static,
    {
        self.take_with_expiry(key, move |_| query()).await
    }

    /// Like [`take`](Self::take), but `query` receives the TTL the new entry will be
    /// stored with.
    ///
    /// # Errors
    ///
    /// Same as [`take`](Self::take).
    pub async fn take_with_expiry<V, F, Fut>(&self, key: &str, query: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(Duration) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>>> + Send + 'static,
    {
        let slot: Slot<V> = Arc::default();
        let engine = self.clone();
        let owned_key = key.to_string();
        let leader_slot = Arc::clone(&slot);

        let bytes = self
            .flight
            .work(owned_key.clone(), move || engine.fetch(owned_key, query, leader_slot))
            .await
            .map_err(Error::panicked)??;

        if let Some(value) = slot.lock().take() {
            return Ok(value);
        }

        // Another caller ran the fetch.
        self.stats().hit();
        self.telemetry.record(CacheOperation::Take, CacheActivity::Shared, key);
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Returns the cached value under `key`, or `None` if it is absent, a
    /// placeholder, or unreadable.
    ///
    /// # Errors
    ///
    /// Returns a [`Cache`](crate::ErrorKind::Cache) error if the store fails.
    pub async fn get<V>(&self, key: &str) -> Result<Option<V>>
    where
        V: DeserializeOwned,
    {
        match self.read(key).await? {
            Lookup::Hit(value, _) => Ok(Some(value)),
            Lookup::Placeholder | Lookup::Miss => Ok(None),
        }
    }

    /// Stores `value` under `key` with the jittered base TTL.
    ///
    /// # Errors
    ///
    /// Returns a serialization error or a [`Cache`](crate::ErrorKind::Cache) error.
    pub async fn set<V>(&self, key: &str, value: &V) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        self.set_with_expiry(key, value, self.jittered(self.expiry)).await
    }

    /// Stores `value` under `key` with exactly `ttl`.
    ///
    /// # Errors
    ///
    /// Returns a serialization error or a [`Cache`](crate::ErrorKind::Cache) error.
    pub async fn set_with_expiry<V>(&self, key: &str, value: &V, ttl: Duration) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        let bytes = Bytes::from(serde_json::to_vec(value)?);
        self.set_bytes_with_expiry(key, bytes, ttl).await
    }

    /// Stores already serialized `bytes` under `key` with exactly `ttl`.
    pub(crate) async fn set_bytes_with_expiry(&self, key: &str, bytes: Bytes, ttl: Duration) -> Result<()> {
        self.write(key, bytes, ttl).await.map_err(Error::cache)
    }

    /// Deletes every key in `keys`.
    ///
    /// # Errors
    ///
    /// Returns a [`Cache`](crate::ErrorKind::Cache) error if the store fails.
    pub async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let joined = keys.join(",");
        match self.store.delete(keys).await {
            Ok(()) => {
                self.telemetry.record(CacheOperation::Delete, CacheActivity::Invalidated, &joined);
                Ok(())
            }
            Err(error) => {
                self.telemetry
                    .record_failure(CacheOperation::Delete, CacheActivity::Error, &joined, &error);
                Err(Error::cache(error))
            }
        }
    }

    /// Applies the configured deviation to `base`, saturating at [`Duration::MAX`].
    pub(crate) fn jittered(&self, base: Duration) -> Duration {
        if self.deviation == 0.0 {
            return base;
        }
        let factor = 1.0 + self.deviation - 2.0 * self.deviation * fastrand::f64();
        Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(Duration::MAX)
    }

    async fn fetch<V, F, Fut>(self, key: String, query: F, slot: Slot<V>) -> Result<Bytes>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(Duration) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>>> + Send + 'static,
    {
        let lookup = match self.read::<V>(&key).await {
            Ok(lookup) => lookup,
            Err(error) => {
                self.telemetry.record_failure(CacheOperation::Get, CacheActivity::Error, &key, &error);
                Lookup::Miss
            }
        };

        match lookup {
            Lookup::Hit(value, bytes) => {
                *slot.lock() = Some(value);
                return Ok(bytes);
            }
            Lookup::Placeholder => return Err(Error::not_found()),
            Lookup::Miss => {}
        }

        let ttl = self.jittered(self.expiry);
        let value = match query(ttl).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                self.cache_not_found(&key).await;
                return Err(Error::not_found());
            }
            Err(error) => {
                self.stats().db_fail();
                self.telemetry.record_failure(CacheOperation::Take, CacheActivity::DbFail, &key, &error);
                return Err(error);
            }
        };

        let bytes = Bytes::from(serde_json::to_vec(&value)?);
        // The read succeeds even when the store rejects the write.
        let _ = self.write(&key, bytes.clone(), ttl).await;
        *slot.lock() = Some(value);
        Ok(bytes)
    }

    async fn read<V>(&self, key: &str) -> std::result::Result<Lookup<V>, rowcache_tier::Error>
    where
        V: DeserializeOwned,
    {
        let Some(bytes) = self.store.get(key).await.inspect_err(|_| self.stats().miss())? else {
            self.stats().miss();
            self.telemetry.record(CacheOperation::Get, CacheActivity::Miss, key);
            return Ok(Lookup::Miss);
        };

        if bytes.as_ref() == NOT_FOUND_PLACEHOLDER {
            self.stats().hit();
            self.telemetry.record(CacheOperation::Get, CacheActivity::Placeholder, key);
            return Ok(Lookup::Placeholder);
        }

        match serde_json::from_slice::<V>(&bytes) {
            Ok(value) => {
                self.stats().hit();
                self.telemetry.record(CacheOperation::Get, CacheActivity::Hit, key);
                Ok(Lookup::Hit(value, bytes))
            }
            Err(error) => {
                self.stats().miss();
                self.telemetry.record_failure(CacheOperation::Get, CacheActivity::Corrupted, key, &error);
                if let Err(error) = self.store.delete(&[key.to_string()]).await {
                    self.telemetry.record_failure(CacheOperation::Delete, CacheActivity::Error, key, &error);
                }
                Ok(Lookup::Miss)
            }
        }
    }

    async fn write(&self, key: &str, bytes: Bytes, ttl: Duration) -> std::result::Result<(), rowcache_tier::Error> {
        match self.store.set_with_ttl(key, bytes, ttl).await {
            Ok(()) => {
                self.telemetry.record(CacheOperation::Set, CacheActivity::Inserted, key);
                Ok(())
            }
            Err(error) => {
                self.telemetry.record_failure(CacheOperation::Set, CacheActivity::Error, key, &error);
                Err(error)
            }
        }
    }

    async fn cache_not_found(&self, key: &str) {
        if self.not_found_expiry.is_zero() {
            return;
        }
        let ttl = self.jittered(self.not_found_expiry);
        let _ = self.write(key, Bytes::from_static(NOT_FOUND_PLACEHOLDER), ttl).await;
    }
}
