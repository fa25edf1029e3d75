// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Storage contract for the `rowcache` cache-aside layer.
//!
//! This crate defines the [`CacheStore`] trait that every cache backend must satisfy,
//! along with the opaque [`Error`] type returned by fallible store operations.
//!
//! # Overview
//!
//! A cache store is a keyed store of opaque serialized values with a per-entry
//! time-to-live. It knows nothing about rows, primary keys or serialization formats;
//! `rowcache` layers those concerns on top. Absence of a key is not an error: [`CacheStore::get`]
//! returns `Ok(None)`.
//!
//! # Implementing a Cache Store
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::Mutex;
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use rowcache_tier::{CacheStore, Error};
//!
//! struct NoExpiryStore(Mutex<HashMap<String, Bytes>>);
//!
//! impl CacheStore for NoExpiryStore {
//!     async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
//!         Ok(self.0.lock().unwrap().get(key).cloned())
//!     }
//!
//!     async fn set(&self, key: &str, value: Bytes) -> Result<(), Error> {
//!         self.0.lock().unwrap().insert(key.to_string(), value);
//!         Ok(())
//!     }
//!
//!     async fn set_with_ttl(&self, key: &str, value: Bytes, _ttl: Duration) -> Result<(), Error> {
//!         self.set(key, value).await
//!     }
//!
//!     async fn delete(&self, keys: &[String]) -> Result<(), Error> {
//!         let mut data = self.0.lock().unwrap();
//!         for key in keys {
//!             data.remove(key);
//!         }
//!         Ok(())
//!     }
//! }
//! ```
//!
//! # Testing
//!
//! Enable the `test-util` feature for [`testing::MockStore`], an in-memory store that
//! records every operation and supports failure injection.

pub mod error;
mod store;
#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use store::CacheStore;
