// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory store implementation using moka.

use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use moka::{Expiry, future::Cache, ops::compute::Op};
use rowcache_tier::{CacheStore, Error};
use tick::Clock;

use crate::builder::MemoryStoreBuilder;

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Bytes,
    ttl: Option<Duration>,
    expires_at: Option<SystemTime>,
}

impl StoredValue {
    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Longest real-time lifetime handed to moka; longer TTLs are reclaimed no later than this.
const MAX_RECLAIM_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Lets moka reclaim memory once an entry's own TTL has elapsed in real time.
///
/// Logical expiry is decided by the store's [`Clock`] on every read.
struct PerEntryTtl;

impl PerEntryTtl {
    fn reclaim_after(value: &StoredValue) -> Option<Duration> {
        value.ttl.map(|ttl| ttl.min(MAX_RECLAIM_TTL))
    }
}

impl Expiry<String, StoredValue> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &StoredValue, _created_at: Instant) -> Option<Duration> {
        Self::reclaim_after(value)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Self::reclaim_after(value)
    }
}

/// A concurrent in-process [`CacheStore`] backed by moka.
///
/// Each write stores its own deadline, computed from the configured [`Clock`].
/// Reads observing a deadline in the past report a miss and remove the entry
/// unless it was overwritten in the meantime.
///
/// Clones share the same underlying storage.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use rowcache_memory::MemoryStore;
/// use rowcache_tier::CacheStore;
/// use tick::ClockControl;
///
/// # futures::executor::block_on(async {
/// let control = ClockControl::new();
/// let store = MemoryStore::new(control.to_clock());
///
/// store.set_with_ttl("idx:a@x.com", "42".into(), Duration::from_secs(10)).await?;
/// control.advance(Duration::from_secs(10));
/// assert!(store.get("idx:a@x.com").await?.is_none());
/// # Ok::<(), rowcache_tier::Error>(())
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Cache<String, StoredValue>,
    clock: Clock,
    default_ttl: Option<Duration>,
}

impl MemoryStore {
    /// Creates a new unbounded store.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self::builder(clock).build()
    }

    /// Creates a new store holding at most `max_capacity` entries.
    #[must_use]
    pub fn with_capacity(clock: Clock, max_capacity: u64) -> Self {
        Self::builder(clock).max_capacity(max_capacity).build()
    }

    /// Creates a new builder for configuring a store.
    #[must_use]
    pub fn builder(clock: Clock) -> MemoryStoreBuilder {
        MemoryStoreBuilder::new(clock)
    }

    pub(crate) fn from_builder(builder: MemoryStoreBuilder) -> Self {
        let mut moka_builder = Cache::builder().expire_after(PerEntryTtl);

        if let Some(capacity) = builder.max_capacity {
            moka_builder = moka_builder.max_capacity(capacity);
        }

        if let Some(capacity) = builder.initial_capacity {
            moka_builder = moka_builder.initial_capacity(capacity);
        }

        if let Some(name) = builder.name.as_deref() {
            moka_builder = moka_builder.name(name);
        }

        Self {
            inner: moka_builder.build(),
            clock: builder.clock,
            default_ttl: builder.default_ttl,
        }
    }

    /// Returns the deadline of the entry stored under `key`.
    ///
    /// Returns `None` when the key is absent or was written without a TTL.
    /// Already expired entries still report their deadline until the next read.
    pub async fn expires_at(&self, key: &str) -> Option<SystemTime> {
        self.inner.get(key).await.and_then(|value| value.expires_at)
    }

    /// Returns true if an entry is stored under `key`, expired or not.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    async fn insert(&self, key: &str, bytes: Bytes, ttl: Option<Duration>) {
        let expires_at = ttl.and_then(|ttl| self.clock.system_time().checked_add(ttl));
        self.inner.insert(key.to_string(), StoredValue { bytes, ttl, expires_at }).await;
    }

    /// Removes the entry under `key` only if it is expired at `now`.
    ///
    /// A value written after the expired read stays in place.
    async fn remove_if_expired(&self, key: &str, now: SystemTime) {
        self.inner
            .entry_by_ref(key)
            .and_compute_with(|entry| {
                let op = match entry {
                    Some(entry) if entry.value().is_expired(now) => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
    }
}

impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
        let Some(value) = self.inner.get(key).await else {
            return Ok(None);
        };

        let now = self.clock.system_time();
        if value.is_expired(now) {
            self.remove_if_expired(key, now).await;
            return Ok(None);
        }

        Ok(Some(value.bytes))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), Error> {
        self.insert(key, value, self.default_ttl).await;
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), Error> {
        self.insert(key, value, Some(ttl)).await;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), Error> {
        for key in keys {
            self.inner.invalidate(key.as_str()).await;
        }
        Ok(())
    }
}
