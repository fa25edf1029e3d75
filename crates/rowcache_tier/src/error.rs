// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The failure type shared by every store backend.

/// A cache store could not complete a read, write or delete.
///
/// Store failures are never fatal to a cached read: the engine treats a failed
/// read as a miss and a failed write as a skipped fill. The underlying cause, for
/// example an I/O error from a remote node, stays reachable through
/// [`std::error::Error::source()`] and [`ohno::ErrorExt::find_source`].
///
/// The type is [`Clone`] so one failure can be handed to every caller waiting on
/// a shared fetch.
///
/// # Example
///
/// ```
/// use rowcache_tier::Error;
///
/// let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "node-2 reset the connection");
/// let error = Error::from_message(io);
/// assert!(error.to_string().contains("node-2 reset the connection"));
/// ```
#[ohno::error]
#[derive(Clone)]
pub struct Error {}

impl Error {
    /// Wraps the failure reported by a store backend.
    pub fn from_message(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(cause)
    }

    /// A key could not be routed because no store can own it.
    #[must_use]
    pub fn unrouted(key: &str) -> Self {
        Self::caused_by(format!("no store owns key {key:?}"))
    }
}

/// Result of a store operation.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::io;

    use ohno::ErrorExt as _;

    use super::*;

    #[test]
    fn backend_cause_is_reachable() {
        let error = Error::from_message(io::Error::new(io::ErrorKind::TimedOut, "node-2 timed out"));

        let cause = error.find_source::<io::Error>().expect("io cause is kept");
        assert_eq!(cause.kind(), io::ErrorKind::TimedOut);
        assert!(error.to_string().contains("node-2 timed out"));
    }

    #[test]
    fn clones_report_the_same_failure() {
        let error = Error::from_message("node unreachable");
        let shared = error.clone();
        assert_eq!(error.to_string(), shared.to_string());
    }

    #[test]
    fn unrouted_names_the_key() {
        let error = Error::unrouted("user:42");
        assert!(error.to_string().contains("\"user:42\""), "got: {error}");
    }
}
