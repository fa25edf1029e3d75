// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured logging and counters for cache operations.
//!
//! Every engine decision is emitted as a `tracing` event named `cache.event` carrying
//! the cache name, the operation and the activity observed. With the `metrics` feature
//! the same event also increments the OpenTelemetry counter `cache.event.count`.

use std::sync::Arc;

#[cfg(any(feature = "metrics", test))]
use opentelemetry::{KeyValue, metrics::Counter};

#[cfg(any(feature = "metrics", test))]
pub(crate) mod attributes;
#[cfg(any(feature = "metrics", test))]
pub(crate) mod metrics;
pub(crate) mod stats;
#[cfg(test)]
pub(crate) mod testing;

pub use stats::{CacheStats, StatsSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheOperation {
    Get,
    Set,
    Delete,
    Take,
}

impl CacheOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "cache.get",
            Self::Set => "cache.set",
            Self::Delete => "cache.delete",
            Self::Take => "cache.take",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheActivity {
    Hit,
    Miss,
    Placeholder,
    Shared,
    Corrupted,
    Inserted,
    Invalidated,
    DbFail,
    Error,
}

impl CacheActivity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "cache.hit",
            Self::Miss => "cache.miss",
            Self::Placeholder => "cache.placeholder",
            Self::Shared => "cache.shared",
            Self::Corrupted => "cache.corrupted",
            Self::Inserted => "cache.inserted",
            Self::Invalidated => "cache.invalidated",
            Self::DbFail => "cache.db_fail",
            Self::Error => "cache.error",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Self::Hit | Self::Miss | Self::Shared => Severity::Debug,
            Self::Placeholder | Self::Corrupted | Self::Inserted | Self::Invalidated => Severity::Info,
            Self::DbFail | Self::Error => Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Severity {
    Debug,
    Info,
    Error,
}

/// Emits cache events and keeps the counters of one cache.
#[derive(Debug, Clone)]
pub(crate) struct CacheTelemetry {
    name: Arc<str>,
    stats: Arc<CacheStats>,
    #[cfg(any(feature = "metrics", test))]
    event_counter: Option<Counter<u64>>,
}

impl CacheTelemetry {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            stats: Arc::new(CacheStats::default()),
            #[cfg(any(feature = "metrics", test))]
            event_counter: None,
        }
    }

    #[cfg(any(feature = "metrics", test))]
    pub fn with_meter(self, meter: &opentelemetry::metrics::Meter) -> Self {
        Self {
            event_counter: Some(metrics::create_event_counter(meter)),
            ..self
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn record(&self, operation: CacheOperation, activity: CacheActivity, key: &str) {
        #[cfg(any(feature = "metrics", test))]
        self.count(operation, activity);
        Self::emit(&self.name, operation, activity, key, None);
    }

    pub fn record_failure(&self, operation: CacheOperation, activity: CacheActivity, key: &str, error: &dyn std::error::Error) {
        #[cfg(any(feature = "metrics", test))]
        self.count(operation, activity);
        Self::emit(&self.name, operation, activity, key, Some(error));
    }

    #[cfg(any(feature = "metrics", test))]
    fn count(&self, operation: CacheOperation, activity: CacheActivity) {
        if let Some(counter) = &self.event_counter {
            counter.add(
                1,
                &[
                    KeyValue::new(attributes::CACHE_NAME, self.name.to_string()),
                    KeyValue::new(attributes::CACHE_OPERATION_NAME, operation.as_str()),
                    KeyValue::new(attributes::CACHE_ACTIVITY_NAME, activity.as_str()),
                ],
            );
        }
    }

    fn emit(cache_name: &str, operation: CacheOperation, activity: CacheActivity, key: &str, error: Option<&dyn std::error::Error>) {
        let op = operation.as_str();
        let ev = activity.as_str();
        let error = error.map(tracing::field::display);

        // Tracing level must be constant, so a macro selects the level.
        macro_rules! emit_event {
            ($level:ident) => {
                tracing::$level!(
                    cache.name = cache_name,
                    cache.operation = op,
                    cache.activity = ev,
                    cache.key = key,
                    error = error,
                    "cache.event"
                )
            };
        }

        match activity.severity() {
            Severity::Error => emit_event!(error),
            Severity::Info => emit_event!(info),
            Severity::Debug => emit_event!(debug),
        }
    }
}
