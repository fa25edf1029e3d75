// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Coalesces duplicate concurrent fetches into a single execution.

use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::Mutex;

type SharedWork<T> = Shared<BoxFuture<'static, Result<T, LeaderPanicked>>>;
type WeakWork<T> = WeakShared<BoxFuture<'static, Result<T, LeaderPanicked>>>;

/// The single-flight group used by the cache engine, keyed by cache key.
///
/// The shared output is the serialized value, so every waiter decodes its own copy.
pub type SharedCalls = FlightGroup<String, crate::Result<Bytes>>;

/// Returned to every waiter when the shared execution panicked.
///
/// The key is released before this is observed, so the next call starts a fresh execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderPanicked;

impl fmt::Display for LeaderPanicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the shared execution panicked")
    }
}

impl std::error::Error for LeaderPanicked {}

struct Call<T> {
    id: u64,
    work: WeakWork<T>,
}

struct Calls<K, T> {
    map: Mutex<HashMap<K, Call<T>>>,
    next_id: AtomicU64,
}

/// Represents a class of work and creates a space in which units of work
/// can be executed with duplicate suppression.
///
/// Concurrent [`work`](Self::work) calls with equal keys share one execution and each
/// receive a clone of its output. The execution is owned jointly by its waiters: a
/// waiter that is dropped leaves the execution running for the others. Once every
/// waiter is gone, or the execution completes, the key is released.
///
/// Clones share the same key space.
///
/// # Examples
///
/// ```
/// use rowcache::FlightGroup;
///
/// # futures::executor::block_on(async {
/// let group: FlightGroup<&str, String> = FlightGroup::new();
///
/// let result = group
///     .work("user:123", || async { "expensive_result".to_string() })
///     .await
///     .unwrap();
/// assert_eq!(result, "expensive_result");
/// # });
/// ```
pub struct FlightGroup<K, T> {
    calls: Arc<Calls<K, T>>,
}

impl<K, T> Clone for FlightGroup<K, T> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<K, T> Default for FlightGroup<K, T> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Calls {
                map: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }
}

impl<K, T> fmt::Debug for FlightGroup<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlightGroup").field("in_flight", &self.calls.map.lock().len()).finish()
    }
}

/// Releases the key when the execution completes or is abandoned by every waiter.
struct Release<K, T>
where
    K: Hash + Eq,
{
    calls: Arc<Calls<K, T>>,
    key: Option<K>,
    id: u64,
}

impl<K, T> Drop for Release<K, T>
where
    K: Hash + Eq,
{
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let mut map = self.calls.map.lock();
        if map.get(&key).is_some_and(|call| call.id == self.id) {
            map.remove(&key);
        }
    }
}

impl<K, T> FlightGroup<K, T>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of keys with an execution in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.calls.map.lock().len()
    }

    /// Executes `func` unless an execution for `key` is already in flight, in which
    /// case the caller waits for that execution's output instead.
    ///
    /// `func` is only called by the caller that starts the execution.
    ///
    /// # Errors
    ///
    /// Returns [`LeaderPanicked`] if the shared execution panicked.
    pub async fn work<F, Fut>(&self, key: K, func: F) -> Result<T, LeaderPanicked>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        if let Some(existing) = self.join(&key) {
            return existing.await;
        }

        let future = func();
        let shared = {
            let mut map = self.calls.map.lock();
            if let Some(existing) = map.get(&key).and_then(|call| call.work.upgrade()) {
                // Lost the race to another caller; its execution wins.
                existing
            } else {
                let id = self.calls.next_id.fetch_add(1, Ordering::Relaxed);
                let release = Release {
                    calls: Arc::clone(&self.calls),
                    key: Some(key.clone()),
                    id,
                };
                let shared = Self::wrap(future, release);
                if let Some(work) = shared.downgrade() {
                    map.insert(key, Call { id, work });
                }
                shared
            }
        };

        shared.await
    }

    fn join(&self, key: &K) -> Option<SharedWork<T>> {
        self.calls.map.lock().get(key).and_then(|call| call.work.upgrade())
    }

    fn wrap<Fut>(future: Fut, release: Release<K, T>) -> SharedWork<T>
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        async move {
            let output = AssertUnwindSafe(future).catch_unwind().await.map_err(|_| LeaderPanicked);
            drop(release);
            output
        }
        .boxed()
        .shared()
    }
}
