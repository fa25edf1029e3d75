// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The core trait for cache storage backends.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;

use crate::Error;

/// Trait for keyed cache stores holding opaque serialized values.
///
/// Implementations must be safe for concurrent use. Writes are full replacements;
/// a store never merges a new value into an existing one.
///
/// Only [`set`](Self::set) relies on a store-specific default TTL. The `rowcache`
/// engine always writes through [`set_with_ttl`](Self::set_with_ttl).
pub trait CacheStore: Send + Sync {
    /// Gets the value stored under `key`, or `None` if the key is absent or expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>, Error>> + Send;

    /// Stores `value` under `key` using the store's default TTL.
    fn set(&self, key: &str, value: Bytes) -> impl Future<Output = Result<(), Error>> + Send;

    /// Stores `value` under `key`, expiring it after `ttl`.
    fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> impl Future<Output = Result<(), Error>> + Send;

    /// Deletes every key in `keys`. Missing keys are ignored.
    fn delete(&self, keys: &[String]) -> impl Future<Output = Result<(), Error>> + Send;
}

impl<S> CacheStore for Arc<S>
where
    S: CacheStore,
{
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>, Error>> + Send {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Bytes) -> impl Future<Output = Result<(), Error>> + Send {
        (**self).set(key, value)
    }

    fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> impl Future<Output = Result<(), Error>> + Send {
        (**self).set_with_ttl(key, value, ttl)
    }

    fn delete(&self, keys: &[String]) -> impl Future<Output = Result<(), Error>> + Send {
        (**self).delete(keys)
    }
}
