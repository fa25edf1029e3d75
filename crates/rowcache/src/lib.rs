// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A cache-aside access layer for relational stores.
//!
//! `rowcache` sits between application queries and a backing database. Reads are served
//! from a cache when possible and populate it on a miss; mutations run first and then
//! invalidate the affected entries.
//!
//! # Key Features
//!
//! - **Single-flight fetches**: concurrent misses on one key run one database query,
//!   see [`FlightGroup`].
//! - **Secondary-key lookups**: [`DbConn::query_row_index`] caches a secondary key as a
//!   pointer to the primary key and keeps the row cached slightly longer than the pointer.
//! - **Negative caching**: rows reported as missing are remembered briefly.
//! - **Graceful degradation**: a failing cache store never fails a read, and a
//!   configuration without nodes turns every read into a direct database query.
//! - **Sharding**: keys are spread over weighted store nodes by [`Cluster`].
//!
//! # Quick Start
//!
//! ```
//! use rowcache::{CacheConfig, DbConn, Error, SharedCalls};
//! use serde::{Deserialize, Serialize};
//! use tick::Clock;
//!
//! #[derive(Clone)]
//! struct Db;
//!
//! #[derive(Debug, Serialize, Deserialize, PartialEq)]
//! struct User {
//!     id: u64,
//!     email: String,
//! }
//!
//! # futures::executor::block_on(async {
//! // One flight group per process, shared by every connection.
//! let flight = SharedCalls::new();
//! let conn = DbConn::with_memory(Db, &CacheConfig::single("local"), flight, Clock::new_frozen());
//!
//! let user: User = conn
//!     .query_row_index(
//!         "user:email:a@x.com",
//!         |id: &u64| format!("user:{id}"),
//!         |_db: Db| async {
//!             let user = User { id: 42, email: "a@x.com".into() };
//!             Ok(Some((user.id, user)))
//!         },
//!         |_db: Db, id: u64| async move { Ok(Some(User { id, email: "a@x.com".into() })) },
//!     )
//!     .await?;
//! assert_eq!(user.id, 42);
//!
//! // Update the row, then drop both cache entries.
//! conn.exec(|_db: Db| async { Ok::<_, Error>(()) }, ["user:42", "user:email:a@x.com"])
//!     .await?;
//! # Ok::<(), Error>(())
//! # });
//! ```
//!
//! # Crate Organization
//!
//! - [`rowcache_tier`] defines the [`CacheStore`](rowcache_tier::CacheStore) contract.
//! - `rowcache_memory` provides an in-process store, re-exported as [`MemoryStore`]
//!   with the `memory` feature (enabled by default).
//! - The `metrics` feature adds `with_meter_provider` on [`RowCache`] and [`DbConn`],
//!   counting every cache event on the OpenTelemetry counter `cache.event.count`.

mod cache;
mod cluster;
mod config;
mod conn;
mod database;
mod error;
mod flight;
mod telemetry;

pub use cache::RowCache;
pub use cluster::Cluster;
pub use config::{CacheConfig, NodeConfig};
pub use conn::{DbConn, INDEX_SAFETY_GAP};
pub use database::{Database, Transaction};
pub use error::{Error, ErrorKind, Result};
pub use flight::{FlightGroup, LeaderPanicked, SharedCalls};
#[cfg(feature = "memory")]
#[cfg_attr(docsrs, doc(cfg(feature = "memory")))]
pub use rowcache_memory::MemoryStore;
pub use rowcache_tier::CacheStore;
pub use telemetry::{CacheStats, StatsSnapshot};
