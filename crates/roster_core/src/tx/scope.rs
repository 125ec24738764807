//! Per-call execution scope.
//!
//! # Responsibility
//! - Carry ambient bindings (the active transaction, if any) explicitly
//!   through every call boundary.
//! - Propagate one cancellation signal to every database operation made
//!   under the same root scope.
//!
//! # Invariants
//! - Scopes are immutable: forking produces a derived scope and never
//!   touches the parent.
//! - A derived scope inherits its parent's transaction binding, overrides
//!   it with a new handle, or overrides it with the no-transaction marker.
//!   Never more than one binding at a time.
//! - The no-transaction marker, once bound, is never cleared for the
//!   lifetime of that scope.

use crate::tx::target::TxHandle;
use parking_lot::Mutex;
use rusqlite::InterruptHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Nearest transaction binding of a scope.
#[derive(Clone, Default)]
enum TxBinding {
    /// No binding; operations resolve to the pool.
    #[default]
    Unbound,
    /// An open transaction; operations join it.
    Active(TxHandle),
    /// The no-transaction marker; operations resolve to the pool even if an
    /// ancestor scope carried a transaction.
    Bypassed,
}

/// Immutable, forkable carrier for ambient per-call state.
///
/// Created once per inbound unit of work and passed by convention to every
/// layer below. Cloning is cheap. A scope that carries a transaction handle
/// is not `Send`: the handle exclusively owns one connection and must stay
/// on the thread that began the transaction.
#[derive(Clone, Default)]
pub struct Scope {
    binding: TxBinding,
    cancel: CancelToken,
}

impl Scope {
    /// Creates a root scope with no bindings and a fresh cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cancellation token shared by this scope and every scope
    /// forked from it.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Reports whether the owning task has requested cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Forks a scope that binds `handle`, masking any prior binding.
    pub(crate) fn with_handle(&self, handle: TxHandle) -> Self {
        Self {
            binding: TxBinding::Active(handle),
            cancel: self.cancel.clone(),
        }
    }

    /// Forks a scope bound with the no-transaction marker.
    pub(crate) fn bypassed(&self) -> Self {
        Self {
            binding: TxBinding::Bypassed,
            cancel: self.cancel.clone(),
        }
    }

    /// Returns the transaction handle bound to this scope, if any.
    pub(crate) fn active_handle(&self) -> Option<&TxHandle> {
        match &self.binding {
            TxBinding::Active(handle) => Some(handle),
            TxBinding::Unbound | TxBinding::Bypassed => None,
        }
    }
}

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    next_registration: AtomicU64,
    interrupts: Mutex<HashMap<u64, InterruptHandle>>,
}

/// Cancellation signal observed by every database operation under one root
/// scope.
///
/// Cancelling interrupts in-flight statements on every registered
/// connection and makes subsequent operations fail fast with
/// [`crate::db::DbError::Canceled`].
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    /// Requests cancellation and interrupts in-flight statements.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        for handle in self.state.interrupts.lock().values() {
            handle.interrupt();
        }
    }

    /// Reports whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Registers a connection's interrupt handle for the lifetime of the
    /// returned guard.
    pub(crate) fn register(&self, handle: InterruptHandle) -> CancelRegistration {
        let id = self.state.next_registration.fetch_add(1, Ordering::Relaxed);
        self.state.interrupts.lock().insert(id, handle);
        // The token may have fired between checkout and registration; make
        // sure a late registration still observes the interrupt.
        if self.is_cancelled() {
            if let Some(handle) = self.state.interrupts.lock().get(&id) {
                handle.interrupt();
            }
        }
        CancelRegistration {
            token: self.clone(),
            id,
        }
    }
}

/// Unregisters an interrupt handle when dropped.
pub(crate) struct CancelRegistration {
    token: CancelToken,
    id: u64,
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        self.token.state.interrupts.lock().remove(&self.id);
    }
}
