// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The backing-store contract.
//!
//! Fetch and mutation closures receive a clone of the connection's handle, so any
//! cheap-to-clone database handle works without implementing these traits. They are
//! only needed for [`DbConn::transact`](crate::DbConn::transact).

use crate::Result;

/// A database handle able to open transactions.
///
/// # Examples
///
/// ```
/// use rowcache::{Database, Result, Transaction};
///
/// #[derive(Clone)]
/// struct Pool;
///
/// #[derive(Clone)]
/// struct Tx;
///
/// impl Database for Pool {
///     type Transaction = Tx;
///
///     async fn begin(&self) -> Result<Tx> {
///         Ok(Tx)
///     }
/// }
///
/// impl Transaction for Tx {
///     async fn commit(&self) -> Result<()> {
///         Ok(())
///     }
///
///     async fn rollback(&self) -> Result<()> {
///         Ok(())
///     }
/// }
/// ```
pub trait Database: Clone + Send + Sync + 'static {
    /// The handle of an open transaction; queries issued through it run inside the transaction.
    type Transaction: Transaction;

    /// Opens a transaction.
    fn begin(&self) -> impl Future<Output = Result<Self::Transaction>> + Send;
}

/// An open transaction.
///
/// Exactly one of [`commit`](Self::commit) or [`rollback`](Self::rollback) is called
/// by [`DbConn::transact`](crate::DbConn::transact), except that a failed commit is
/// followed by a rollback.
pub trait Transaction: Clone + Send + Sync + 'static {
    /// Commits the transaction.
    fn commit(&self) -> impl Future<Output = Result<()>> + Send;

    /// Rolls the transaction back.
    fn rollback(&self) -> impl Future<Output = Result<()>> + Send;
}
