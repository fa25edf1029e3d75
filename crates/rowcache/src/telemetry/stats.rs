// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Request counters of a cache.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters of one cache.
///
/// `total` counts cache lookups, split into `hit` and `miss`. Callers that received a
/// value fetched by a concurrent caller are counted as hits. `db_fails` counts fetch
/// failures of the backing store, once per shared fetch.
///
/// These counters back [`snapshot`](Self::snapshot). For export, the same events are
/// counted on `cache.event.count` when a meter provider is attached with the `metrics`
/// feature.
#[derive(Debug, Default)]
pub struct CacheStats {
    total: AtomicU64,
    hit: AtomicU64,
    miss: AtomicU64,
    db_fails: AtomicU64,
}

/// A point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Number of cache lookups.
    pub total: u64,
    /// Lookups answered from the cache.
    pub hit: u64,
    /// Lookups that found nothing usable.
    pub miss: u64,
    /// Failed backing-store fetches.
    pub db_fails: u64,
}

impl StatsSnapshot {
    /// Returns the fraction of lookups answered from the cache, or zero without lookups.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "ratio is approximate by nature")]
    pub fn hit_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.hit as f64 / self.total as f64
        }
    }
}

impl CacheStats {
    pub(crate) fn hit(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.hit.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.miss.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn db_fail(&self) {
        self.db_fails.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            db_fails: self.db_fails.load(Ordering::Relaxed),
        }
    }

    /// Logs the current counters at info level and returns them.
    pub fn report(&self, cache_name: &str) -> StatsSnapshot {
        let snapshot = self.snapshot();
        tracing::info!(
            cache.name = cache_name,
            cache.total = snapshot.total,
            cache.hit = snapshot.hit,
            cache.miss = snapshot.miss,
            cache.db_fails = snapshot.db_fails,
            cache.hit_ratio = snapshot.hit_ratio(),
            "cache.stats"
        );
        snapshot
    }
}
