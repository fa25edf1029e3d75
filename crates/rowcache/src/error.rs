// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache-aside operations.

use std::fmt;

/// The category of a [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The backing store has no row, or the cache holds a not-found placeholder.
    NotFound,
    /// A cache-only helper was called on a connection without a cache.
    CacheDisabled,
    /// A fetch, mutation or transaction failed in the backing store.
    Database,
    /// A cache store operation failed and the failure reached the caller.
    Cache,
    /// A value could not be encoded or decoded.
    Serialization,
    /// The connection deadline elapsed.
    Timeout,
    /// The shared fetch panicked.
    Panicked,
}

impl ErrorKind {
    /// Returns a short static description of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::CacheDisabled => "cache disabled",
            Self::Database => "database error",
            Self::Cache => "cache error",
            Self::Serialization => "serialization error",
            Self::Timeout => "timed out",
            Self::Panicked => "shared fetch panicked",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from a cache-aside operation.
///
/// Errors are cheap to clone, so a single failure of a shared fetch can be handed to
/// every caller waiting on it. The underlying cause, for example a
/// [`rowcache_tier::Error`] or a database driver error, is reachable through
/// [`std::error::Error::source()`] or [`ErrorExt::find_source`](ohno::ErrorExt::find_source).
///
/// # Examples
///
/// ```
/// use rowcache::{Error, ErrorKind};
///
/// let error = Error::database("connection refused");
/// assert_eq!(error.kind(), ErrorKind::Database);
/// assert!(error.to_string().contains("connection refused"));
///
/// assert!(Error::not_found().is_not_found());
/// ```
#[ohno::error]
#[derive(Clone)]
#[display("{kind}")]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound)
    }

    /// Creates an error for a cache-only operation on an uncached connection.
    #[must_use]
    pub fn cache_disabled() -> Self {
        Self::new(ErrorKind::CacheDisabled)
    }

    /// Creates a backing-store error wrapping `cause`.
    pub fn database(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Database, cause)
    }

    /// Creates a cache store error wrapping `cause`.
    pub fn cache(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Cache, cause)
    }

    /// Creates a serialization error wrapping `cause`.
    pub fn serialization(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Serialization, cause)
    }

    pub(crate) fn timeout(cause: tick::Error) -> Self {
        Self::caused_by(ErrorKind::Timeout, cause)
    }

    /// A call that started after its budget was used up.
    pub(crate) fn deadline_elapsed() -> Self {
        Self::new(ErrorKind::Timeout)
    }

    pub(crate) fn panicked(cause: crate::LeaderPanicked) -> Self {
        Self::caused_by(ErrorKind::Panicked, cause)
    }

    /// Returns the category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error means "no such row".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

impl From<rowcache_tier::Error> for Error {
    fn from(error: rowcache_tier::Error) -> Self {
        Self::cache(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization(error)
    }
}

/// A specialized [`Result`] type for cache-aside operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use ohno::ErrorExt;

    use super::*;

    #[test]
    fn kind_is_reported() {
        assert_eq!(Error::not_found().kind(), ErrorKind::NotFound);
        assert_eq!(Error::cache_disabled().kind(), ErrorKind::CacheDisabled);
        assert_eq!(Error::database("x").kind(), ErrorKind::Database);
        assert_eq!(Error::cache("x").kind(), ErrorKind::Cache);
        assert_eq!(Error::serialization("x").kind(), ErrorKind::Serialization);
    }

    #[test]
    fn display_starts_with_kind() {
        let error = Error::database("deadlock detected");
        let display = error.to_string();
        assert!(display.starts_with("database error"), "got: {display}");
        assert!(display.contains("deadlock detected"), "got: {display}");
    }

    #[test]
    fn store_error_stays_reachable_as_source() {
        let error: Error = rowcache_tier::Error::from_message("node-1 unreachable").into();
        assert_eq!(error.kind(), ErrorKind::Cache);
        assert!(error.find_source::<rowcache_tier::Error>().is_some());
    }

    #[test]
    fn json_error_maps_to_serialization() {
        let json_error = serde_json::from_slice::<u32>(b"not json").unwrap_err();
        let error: Error = json_error.into();
        assert_eq!(error.kind(), ErrorKind::Serialization);
    }

    #[test]
    fn clone_keeps_kind_and_message() {
        let error = Error::database("gone");
        let cloned = error.clone();
        assert_eq!(cloned.kind(), ErrorKind::Database);
        assert_eq!(error.to_string(), cloned.to_string());
    }

    #[test]
    fn only_not_found_is_not_found() {
        assert!(Error::not_found().is_not_found());
        assert!(!Error::cache_disabled().is_not_found());
        assert!(!Error::database("x").is_not_found());
    }
}
