// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The connection facade combining a database handle with an optional cache.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use parking_lot::Mutex;
use rowcache_tier::CacheStore;
use serde::{Serialize, de::DeserializeOwned};
use tick::{Clock, FutureExt as _};

use crate::{CacheConfig, Cluster, Database, Error, NodeConfig, Result, RowCache, SharedCalls, Transaction};

/// Extra lifetime of a primary entry over the index entry pointing at it.
///
/// An index entry that is still valid always resolves to a primary entry that is
/// still cached, so a secondary-key read never pays for two backing-store lookups.
pub const INDEX_SAFETY_GAP: Duration = Duration::from_secs(5);

/// A database handle fronted by a cache-aside layer.
///
/// Reads go through the cache when one is configured and fall back to the database
/// handle directly when caching is disabled. Mutations run first and invalidate the
/// listed keys afterwards.
///
/// Clones share the cache, the flight group and the stats. Closures passed to the cached
/// read methods run inside a shared fetch, so they must own their captures.
///
/// # Examples
///
/// ```
/// use rowcache::{CacheConfig, DbConn, Error, SharedCalls};
/// use tick::Clock;
///
/// #[derive(Clone)]
/// struct Db;
///
/// # futures::executor::block_on(async {
/// let flight = SharedCalls::new();
/// let conn = DbConn::with_memory(Db, &CacheConfig::single("local"), flight, Clock::new_frozen());
///
/// let name: String = conn
///     .query_row("user:1", |_db: Db| async { Ok(Some("Ada".to_string())) })
///     .await?;
/// assert_eq!(name, "Ada");
///
/// conn.exec(|_db: Db| async { Ok::<_, Error>(()) }, ["user:1"]).await?;
/// # Ok::<(), Error>(())
/// # });
/// ```
pub struct DbConn<D, S> {
    db: D,
    cache: Option<RowCache<Cluster<S>>>,
    clock: Clock,
    timeout: Option<Duration>,
    // Absolute end of the enclosing transaction's budget.
    expires_at: Option<Instant>,
}

impl<D, S> Clone for DbConn<D, S>
where
    D: Clone,
{
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            cache: self.cache.clone(),
            clock: self.clock.clone(),
            timeout: self.timeout,
            expires_at: self.expires_at,
        }
    }
}

impl<D, S> fmt::Debug for DbConn<D, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConn")
            .field("cache", &self.cache)
            .field("timeout", &self.timeout)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "memory")]
impl<D> DbConn<D, rowcache_memory::MemoryStore>
where
    D: Clone + Send + Sync + 'static,
{
    /// Creates a connection caching into one in-process store per configured node.
    #[must_use]
    pub fn with_memory(db: D, config: &CacheConfig, flight: SharedCalls, clock: Clock) -> Self {
        let store_clock = clock.clone();
        Self::new(db, config, flight, clock, |node| {
            rowcache_memory::MemoryStore::builder(store_clock.clone()).name(node.name.clone()).build()
        })
    }
}

impl<D, S> DbConn<D, S>
where
    D: Clone + Send + Sync + 'static,
    S: CacheStore + 'static,
{
    /// Creates a connection caching into one store per configured node.
    ///
    /// `make_store` is called once per node with a positive weight. When the
    /// configuration has no such node the connection is uncached.
    #[must_use]
    pub fn new<F>(db: D, config: &CacheConfig, flight: SharedCalls, clock: Clock, mut make_store: F) -> Self
    where
        F: FnMut(&NodeConfig) -> S,
    {
        if !config.is_enabled() {
            return Self::uncached(db, clock);
        }

        let nodes = config
            .nodes
            .iter()
            .filter(|node| node.weight > 0)
            .map(|node| (node.clone(), make_store(node)))
            .collect::<Vec<_>>();

        Self {
            db,
            cache: Some(RowCache::new(Cluster::new(nodes), config, flight)),
            clock,
            timeout: None,
            expires_at: None,
        }
    }

    /// Creates a connection without a cache; every read goes to the database.
    #[must_use]
    pub fn uncached(db: D, clock: Clock) -> Self {
        Self {
            db,
            cache: None,
            clock,
            timeout: None,
            expires_at: None,
        }
    }

    /// Counts cache events on a `cache.event.count` counter from `meter_provider`.
    ///
    /// Does nothing without a cache. Connections cloned afterwards share the counter.
    #[cfg(any(feature = "metrics", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
    #[must_use]
    pub fn with_meter_provider(self, meter_provider: &dyn opentelemetry::metrics::MeterProvider) -> Self {
        Self {
            cache: self.cache.map(|cache| cache.with_meter_provider(meter_provider)),
            ..self
        }
    }

    /// Returns the database handle.
    #[must_use]
    pub fn db(&self) -> &D {
        &self.db
    }

    /// Returns the cache, if one is configured.
    #[must_use]
    pub fn cache(&self) -> Option<&RowCache<Cluster<S>>> {
        self.cache.as_ref()
    }

    /// Returns true if reads go through a cache.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// Returns the clock deadlines are measured on.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Returns a connection whose reads and mutations fail with a
    /// [`Timeout`](crate::ErrorKind::Timeout) error once `timeout` elapses.
    ///
    /// The timeout covers a whole call, so both hops of
    /// [`query_row_index`](Self::query_row_index) share it. Inside
    /// [`transact`](Self::transact) it covers the whole transaction.
    ///
    /// A shared fetch abandoned by a timed-out caller keeps running for the other
    /// callers waiting on it. Invalidation after a successful mutation is never
    /// cut short.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self.clone()
        }
    }

    /// Reads the row cached under `key`, running `fetch` on a miss.
    ///
    /// # Errors
    ///
    /// Returns a [`NotFound`](crate::ErrorKind::NotFound) error when `fetch` finds no
    /// row, or the error returned by `fetch`.
    pub async fn query_row<V, F, Fut>(&self, key: &str, fetch: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(D) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>>> + Send + 'static,
    {
        let db = self.db.clone();
        match &self.cache {
            Some(cache) => self.deadline(cache.take(key, move || fetch(db))).await,
            None => self.deadline(fetch(db)).await?.ok_or_else(Error::not_found),
        }
    }

    /// Reads a row by a secondary key through an index entry.
    ///
    /// The index entry under `index_key` holds the row's primary key; the row itself
    /// is cached under `keyer(primary_key)`. On an index miss, `index_query` loads both
    /// and the row is cached for [`INDEX_SAFETY_GAP`] longer than the index entry. On
    /// an index hit the row is read through the cache, running `primary_query` on a miss.
    ///
    /// # Errors
    ///
    /// Returns a [`NotFound`](crate::ErrorKind::NotFound) error when either query finds
    /// no row, or the error returned by a query.
    pub async fn query_row_index<P, V, K, IQ, IQFut, PQ, PQFut>(
        &self,
        index_key: &str,
        keyer: K,
        index_query: IQ,
        primary_query: PQ,
    ) -> Result<V>
    where
        P: Serialize + DeserializeOwned + Send + 'static,
        V: Serialize + DeserializeOwned + Send + 'static,
        K: Fn(&P) -> String + Send + Sync + 'static,
        IQ: FnOnce(D) -> IQFut + Send + 'static,
        IQFut: Future<Output = Result<Option<(P, V)>>> + Send + 'static,
        PQ: FnOnce(D, P) -> PQFut + Send + 'static,
        PQFut: Future<Output = Result<Option<V>>> + Send + 'static,
    {
        let Some(cache) = &self.cache else {
            let (_, row) = self.deadline(index_query(self.db.clone())).await?.ok_or_else(Error::not_found)?;
            return Ok(row);
        };

        let keyer = Arc::new(keyer);
        let found: Arc<Mutex<Option<V>>> = Arc::default();

        let resolve = {
            let cache = cache.clone();
            let db = self.db.clone();
            let keyer = Arc::clone(&keyer);
            let found = Arc::clone(&found);
            move |ttl: Duration| async move {
                let Some((primary_key, row)) = index_query(db).await? else {
                    return Ok(None);
                };
                let row_key = (*keyer)(&primary_key);
                let bytes = Bytes::from(serde_json::to_vec(&row)?);
                if let Err(error) = cache
                    .set_bytes_with_expiry(&row_key, bytes, ttl.saturating_add(INDEX_SAFETY_GAP))
                    .await
                {
                    tracing::warn!(
                        cache.name = cache.name(),
                        cache.key = row_key.as_str(),
                        error = %error,
                        "failed to cache row resolved by index"
                    );
                }
                *found.lock() = Some(row);
                Ok::<_, Error>(Some(primary_key))
            }
        };

        self.deadline(async {
            let primary_key: P = cache.take_with_expiry(index_key, resolve).await?;
            let resolved = found.lock().take();
            if let Some(row) = resolved {
                return Ok(row);
            }

            let row_key = (*keyer)(&primary_key);
            let db = self.db.clone();
            cache.take(&row_key, move || primary_query(db, primary_key)).await
        })
        .await
    }

    /// Reads a row straight from the database, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Returns a [`NotFound`](crate::ErrorKind::NotFound) error when `fetch` finds no
    /// row, or the error returned by `fetch`.
    pub async fn query_row_no_cache<V, F, Fut>(&self, fetch: F) -> Result<V>
    where
        F: FnOnce(D) -> Fut,
        Fut: Future<Output = Result<Option<V>>>,
    {
        self.deadline(fetch(self.db.clone())).await?.ok_or_else(Error::not_found)
    }

    /// Runs `mutation`, then invalidates `keys`.
    ///
    /// Keys are only invalidated after the mutation succeeded.
    ///
    /// # Errors
    ///
    /// Returns the error of `mutation`, leaving the cache untouched, or a
    /// [`Cache`](crate::ErrorKind::Cache) error if invalidation failed after the
    /// mutation was applied.
    #[ohno::enrich_err("mutation with cache invalidation failed")]
    pub async fn exec<R, F, Fut, I>(&self, mutation: F, keys: I) -> Result<R>
    where
        F: FnOnce(D) -> Fut,
        Fut: Future<Output = Result<R>>,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        let result = self.deadline(mutation(self.db.clone())).await?;
        self.del_cache(&keys).await?;
        Ok(result)
    }

    /// Runs `mutation` without touching the cache.
    ///
    /// # Errors
    ///
    /// Returns the error of `mutation`.
    pub async fn exec_no_cache<R, F, Fut>(&self, mutation: F) -> Result<R>
    where
        F: FnOnce(D) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        self.deadline(mutation(self.db.clone())).await
    }

    /// Reads the value cached under `key` without falling back to the database.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheDisabled`](crate::ErrorKind::CacheDisabled) error without a
    /// cache, a [`NotFound`](crate::ErrorKind::NotFound) error when nothing usable is
    /// cached, or a [`Cache`](crate::ErrorKind::Cache) error if the store failed.
    pub async fn get_cache<V>(&self, key: &str) -> Result<V>
    where
        V: DeserializeOwned,
    {
        let cache = self.cache.as_ref().ok_or_else(Error::cache_disabled)?;
        self.deadline(cache.get(key)).await?.ok_or_else(Error::not_found)
    }

    /// Caches `value` under `key` with the configured expiry. Does nothing without a cache.
    ///
    /// # Errors
    ///
    /// Returns a serialization error or a [`Cache`](crate::ErrorKind::Cache) error.
    pub async fn set_cache<V>(&self, key: &str, value: &V) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        match &self.cache {
            Some(cache) => cache.set(key, value).await,
            None => Ok(()),
        }
    }

    /// Caches `value` under `key` for exactly `ttl`. Does nothing without a cache.
    ///
    /// # Errors
    ///
    /// Returns a serialization error or a [`Cache`](crate::ErrorKind::Cache) error.
    pub async fn set_cache_with_ttl<V>(&self, key: &str, value: &V, ttl: Duration) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        match &self.cache {
            Some(cache) => cache.set_with_expiry(key, value, ttl).await,
            None => Ok(()),
        }
    }

    /// Deletes `keys` from the cache. Does nothing without a cache.
    ///
    /// # Errors
    ///
    /// Returns a [`Cache`](crate::ErrorKind::Cache) error if the store failed.
    pub async fn del_cache(&self, keys: &[String]) -> Result<()> {
        match &self.cache {
            Some(cache) => cache.delete(keys).await,
            None => Ok(()),
        }
    }

    /// Runs `f` inside a transaction.
    ///
    /// `f` receives a connection over the transaction handle that shares this
    /// connection's cache and flight group. With a timeout set, `begin` and every
    /// call inside `f` draw on one budget that starts when `transact` is called.
    /// The transaction is committed when `f` succeeds and rolled back when `f` or
    /// the commit fails.
    ///
    /// # Errors
    ///
    /// Returns the error of `begin`, of `f`, or of the commit.
    #[ohno::enrich_err("transaction failed")]
    pub async fn transact<R, F, Fut>(&self, f: F) -> Result<R>
    where
        D: Database,
        F: FnOnce(DbConn<D::Transaction, S>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let expires_at = self.transaction_deadline();
        let tx = self.deadline(self.db.begin()).await?;
        let conn = DbConn {
            db: tx.clone(),
            cache: self.cache.clone(),
            clock: self.clock.clone(),
            timeout: self.timeout,
            expires_at,
        };

        let result = match f(conn).await {
            Ok(value) => tx.commit().await.map(|()| value),
            Err(error) => Err(error),
        };

        if let Err(error) = &result {
            if let Err(rollback_error) = tx.rollback().await {
                tracing::warn!(error = %error, rollback_error = %rollback_error, "transaction rollback failed");
            }
        }

        result
    }
}

impl<D, S> DbConn<D, S> {
    fn transaction_deadline(&self) -> Option<Instant> {
        let from_timeout = self.timeout.and_then(|timeout| self.clock.instant().checked_add(timeout));
        match (self.expires_at, from_timeout) {
            (Some(outer), Some(inner)) => Some(outer.min(inner)),
            (outer, inner) => outer.or(inner),
        }
    }

    /// Returns how long the next call may wait, or `None` without a limit.
    fn remaining(&self) -> Option<Duration> {
        let left = self
            .expires_at
            .map(|expires_at| expires_at.saturating_duration_since(self.clock.instant()));
        match (self.timeout, left) {
            (Some(timeout), Some(left)) => Some(timeout.min(left)),
            (timeout, left) => timeout.or(left),
        }
    }

    async fn deadline<T>(&self, future: impl Future<Output = Result<T>>) -> Result<T> {
        match self.remaining() {
            Some(left) if left.is_zero() => Err(Error::deadline_elapsed()),
            Some(left) => future.timeout(&self.clock, left).await.map_err(Error::timeout)?,
            None => future.await,
        }
    }
}
