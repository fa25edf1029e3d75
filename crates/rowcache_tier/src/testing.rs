// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock cache store for testing.
//!
//! This module provides `MockStore`, an in-memory store that records all
//! operations and supports failure injection for testing error paths.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{CacheStore, Error};

/// Recorded store operation with full context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// A get operation was performed with the given key.
    Get(String),
    /// A set operation was performed.
    Set {
        /// The key that was written.
        key: String,
        /// The value that was written.
        value: Bytes,
        /// The TTL requested by the caller, `None` for the store default.
        ttl: Option<Duration>,
    },
    /// A delete operation was performed with the given keys.
    Delete(Vec<String>),
}

impl StoreOp {
    /// Returns the TTL of a set operation on `key`, if this is one.
    #[must_use]
    pub fn ttl_for(&self, key: &str) -> Option<Duration> {
        match self {
            Self::Set { key: k, ttl, .. } if k == key => *ttl,
            _ => None,
        }
    }
}

type FailPredicate = Box<dyn Fn(&StoreOp) -> bool + Send + Sync>;

/// A configurable mock cache store for testing.
///
/// Values never expire; the requested TTL is only recorded. Clones share the
/// same data, operation log and failure predicate.
///
/// # Examples
///
/// ```
/// use rowcache_tier::{CacheStore, testing::{MockStore, StoreOp}};
///
/// # futures::executor::block_on(async {
/// let store = MockStore::new();
///
/// store.set("key", "42".into()).await.unwrap();
/// assert_eq!(store.get("key").await.unwrap().as_deref(), Some(&b"42"[..]));
///
/// // Fail only deletes
/// store.fail_when(|op| matches!(op, StoreOp::Delete(_)));
/// assert!(store.delete(&["key".to_string()]).await.is_err());
/// assert!(store.contains_key("key"));
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MockStore {
    data: Arc<Mutex<HashMap<String, Bytes>>>,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    fail_when: Arc<Mutex<Option<FailPredicate>>>,
}

impl std::fmt::Debug for MockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStore")
            .field("data", &self.data)
            .field("operations", &self.operations)
            .field("fail_when", &self.fail_when.lock().is_some())
            .finish()
    }
}

impl MockStore {
    /// Creates a new empty mock store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock store with pre-populated data.
    #[must_use]
    pub fn with_data(data: HashMap<String, Bytes>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
            ..Self::default()
        }
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.data.lock().len()
    }

    /// Returns true if the store contains the given key.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.lock().contains_key(key)
    }

    /// Returns a copy of the raw value stored under `key`.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<Bytes> {
        self.data.lock().get(key).cloned()
    }

    /// Writes a raw value without recording an operation.
    pub fn put_raw(&self, key: &str, value: impl Into<Bytes>) {
        self.data.lock().insert(key.to_string(), value.into());
    }

    /// Sets a predicate that determines when operations should fail.
    ///
    /// Failed operations are still recorded but leave the data untouched.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&StoreOp) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Clears the failure predicate, allowing all operations to succeed.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Returns a clone of all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations.lock().clone()
    }

    /// Returns the TTL of the most recent set on `key`.
    #[must_use]
    pub fn last_ttl(&self, key: &str) -> Option<Duration> {
        self.operations.lock().iter().rev().find_map(|op| op.ttl_for(key))
    }

    /// Clears all recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    fn record(&self, op: StoreOp) -> Result<(), Error> {
        let fail = self.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        let message = match &op {
            StoreOp::Get(_) => "mock: get failed",
            StoreOp::Set { .. } => "mock: set failed",
            StoreOp::Delete(_) => "mock: delete failed",
        };
        self.operations.lock().push(op);
        if fail { Err(Error::caused_by(message)) } else { Ok(()) }
    }
}

impl CacheStore for MockStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
        self.record(StoreOp::Get(key.to_string()))?;
        Ok(self.data.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), Error> {
        self.record(StoreOp::Set {
            key: key.to_string(),
            value: value.clone(),
            ttl: None,
        })?;
        self.data.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), Error> {
        self.record(StoreOp::Set {
            key: key.to_string(),
            value: value.clone(),
            ttl: Some(ttl),
        })?;
        self.data.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), Error> {
        self.record(StoreOp::Delete(keys.to_vec()))?;
        let mut data = self.data.lock();
        for key in keys {
            data.remove(key);
        }
        Ok(())
    }
}
