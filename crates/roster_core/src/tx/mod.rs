//! Ambient transaction machinery.
//!
//! # Responsibility
//! - Let nested application/repository calls share one database
//!   transaction without threading a transaction handle through every
//!   signature.
//! - Resolve, per call, whether work runs on the shared pool or on the
//!   transaction bound to the current [`Scope`].
//!
//! # Invariants
//! - A scope carries at most one transaction binding at a time.
//! - Begin and commit failures surface as [`TxError`]; rollback failures
//!   are logged, never propagated.
//! - The work's own error is returned unchanged, so callers can keep
//!   matching on it.

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod manager;
pub mod scope;
pub mod target;

pub use manager::Transactor;
pub use scope::{CancelToken, Scope};
pub use target::{Db, DbResolver, ExecutionTarget, TxHandle, TxState};

pub type TxResult<T> = Result<T, TxError>;

/// Transaction lifecycle failures attributable to the transactor itself.
#[derive(Debug)]
pub enum TxError {
    /// Acquiring a connection or starting the transaction failed; the unit
    /// of work was never invoked.
    Begin(DbError),
    /// The commit failed; durability of the work is unknown and the
    /// underlying connection has been discarded.
    Commit(DbError),
}

impl Display for TxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Begin(err) => write!(f, "failed to begin transaction: {err}"),
            Self::Commit(err) => write!(f, "failed to commit transaction: {err}"),
        }
    }
}

impl Error for TxError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Begin(err) | Self::Commit(err) => Some(err),
        }
    }
}
