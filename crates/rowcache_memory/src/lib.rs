// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! In-process cache store backed by moka.
//!
//! This crate provides [`MemoryStore`], a concurrent [`CacheStore`](rowcache_tier::CacheStore)
//! using moka's `TinyLFU` eviction. Every entry carries its own TTL, evaluated against
//! a [`tick::Clock`] so expiry can be driven deterministically in tests.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//!
//! use rowcache_memory::MemoryStore;
//! use rowcache_tier::CacheStore;
//! use tick::Clock;
//!
//! # futures::executor::block_on(async {
//! let store = MemoryStore::builder(Clock::new_frozen())
//!     .max_capacity(10_000)
//!     .default_ttl(Duration::from_secs(300))
//!     .build();
//!
//! store.set_with_ttl("row:42", "{}".into(), Duration::from_secs(60)).await?;
//! assert!(store.get("row:42").await?.is_some());
//! # Ok::<(), rowcache_tier::Error>(())
//! # });
//! ```

pub mod builder;
mod store;

#[doc(inline)]
pub use builder::MemoryStoreBuilder;
#[doc(inline)]
pub use store::MemoryStore;
