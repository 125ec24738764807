//! The transactor: ambient transaction boundaries.
//!
//! # Responsibility
//! - Begin a (possibly nested) transaction against whatever target the
//!   scope resolves to, run the caller's unit of work under a derived
//!   scope, and settle the transaction from the work's outcome.
//!
//! # Invariants
//! - The unit of work runs only between a successful begin and the
//!   commit/rollback decision; a failed begin never invokes it.
//! - The work's error is returned unchanged; rollback failures are logged,
//!   never propagated.
//! - Transactor state is immutable; everything mutable lives in the scope
//!   and the handle it carries.

use crate::db::ConnectionPool;
use crate::tx::scope::Scope;
use crate::tx::target::{DbResolver, ExecutionTarget};
use crate::tx::TxError;
use log::warn;
use std::sync::Arc;

/// Runs units of work inside database transactions resolved from the
/// ambient scope.
#[derive(Clone)]
pub struct Transactor {
    resolver: DbResolver,
}

impl Transactor {
    /// Creates a transactor over `pool`, together with the target resolver
    /// repositories should use for their queries.
    pub fn new(pool: Arc<ConnectionPool>) -> (Self, DbResolver) {
        let resolver = DbResolver::new(pool);
        (
            Self {
                resolver: resolver.clone(),
            },
            resolver,
        )
    }

    /// Executes `work` inside a transaction and settles it from the result.
    ///
    /// # Contract
    /// - Resolves the current target from `scope`: an active transaction
    ///   joins as a nested (savepoint) transaction, otherwise a fresh
    ///   top-level transaction starts on the pool.
    /// - `work` receives a derived scope carrying the new transaction;
    ///   repository calls made with it participate automatically.
    /// - `Ok` commits; commit failures surface as [`TxError::Commit`] and
    ///   the connection is discarded.
    /// - `Err` rolls back best-effort and returns the work's error
    ///   unchanged; rollback failures are only logged.
    /// - A failed begin ([`TxError::Begin`]) short-circuits: `work` never
    ///   runs.
    pub fn in_transaction<T, E, F>(&self, scope: &Scope, work: F) -> Result<T, E>
    where
        E: From<TxError>,
        F: FnOnce(&Scope) -> Result<T, E>,
    {
        let target = self.resolver.db(scope);
        let handle = match target.begin(scope) {
            Ok(handle) => handle,
            Err(err) => return Err(E::from(TxError::Begin(err))),
        };
        let tx_scope = scope.with_handle(handle.clone());

        match work(&tx_scope) {
            Ok(value) => match handle.commit() {
                Ok(()) => Ok(value),
                Err(err) => Err(E::from(TxError::Commit(err))),
            },
            Err(work_err) => {
                // Surfacing a rollback failure here would mask the failure
                // that caused it; the connection is discarded regardless.
                if let Err(rollback_err) = handle.rollback() {
                    warn!(
                        "event=tx_rollback module=tx status=error depth={} error={rollback_err}",
                        handle.depth()
                    );
                }
                Err(work_err)
            }
        }
    }

    /// Forks a scope that executes outside any enclosing transaction.
    ///
    /// Later `in_transaction` calls on the returned scope (and scopes
    /// derived from it, unless re-bound) begin fresh top-level transactions
    /// against the pool instead of joining the masked ancestor.
    ///
    /// SQLite is single-writer: a bypassed *write* transaction opened while
    /// the ambient transaction already holds the write lock waits up to the
    /// configured busy timeout. Order bypassed writes before the ambient
    /// transaction's own writes.
    pub fn skip(&self, scope: &Scope) -> Scope {
        scope.bypassed()
    }

    /// Reports whether `scope` carries an active transaction binding.
    ///
    /// False for unbound and bypassed scopes. Diagnostic and test helper;
    /// production control flow should not branch on it.
    pub fn is_within_transaction(scope: &Scope) -> bool {
        scope.active_handle().is_some()
    }
}
