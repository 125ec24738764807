//! Execution targets: the pool and open transaction handles.
//!
//! # Responsibility
//! - Expose one capability set (run a statement, begin a transaction) over
//!   both the shared pool and an open transaction, so callers never
//!   special-case nesting.
//! - Resolve which target serves a given scope.
//!
//! # Invariants
//! - A transaction handle exclusively owns one pooled connection from begin
//!   until its terminal state.
//! - Terminal handles (committed or rolled-back) reject further use by
//!   panicking: stale-handle use is a programming error, not a recoverable
//!   condition.
//! - Nested transactions are savepoints on the ancestor's connection; only
//!   the top-level handle releases the connection.

use crate::db::{ConnectionPool, DbError, DbResult, PooledConn};
use crate::tx::scope::Scope;
use log::debug;
use rusqlite::Connection;
use std::cell::{Cell, RefCell};
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::sync::Arc;

/// Lifecycle state of a transaction handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Begun,
    Committed,
    RolledBack,
}

impl Display for TxState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Begun => write!(f, "begun"),
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled-back"),
        }
    }
}

struct TxInner {
    /// Shared with every handle nested on the same connection.
    conn: Rc<RefCell<Option<PooledConn>>>,
    /// 0 = top-level transaction, n > 0 = savepoint depth.
    depth: u32,
    state: Cell<TxState>,
}

/// A live transaction over one exclusively-owned connection.
///
/// Handles are cheaply cloneable so a [`Scope`] can carry one; every clone
/// shares the same lifecycle state. Handles are intentionally not `Send`:
/// a transaction belongs to the task that began it.
#[derive(Clone)]
pub struct TxHandle {
    inner: Rc<TxInner>,
}

impl TxHandle {
    pub(crate) fn begin_top(conn: PooledConn) -> DbResult<Self> {
        conn.execute_batch("BEGIN;")?;
        debug!("event=tx_begin module=tx status=ok depth=0");
        Ok(Self {
            inner: Rc::new(TxInner {
                conn: Rc::new(RefCell::new(Some(conn))),
                depth: 0,
                state: Cell::new(TxState::Begun),
            }),
        })
    }

    /// Savepoint depth of this handle; 0 for a top-level transaction.
    pub fn depth(&self) -> u32 {
        self.inner.depth
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxState {
        self.inner.state.get()
    }

    pub(crate) fn commit(&self) -> DbResult<()> {
        self.assert_open("commit");

        if self.inner.depth == 0 {
            match self.exec_control("COMMIT;") {
                Ok(()) => {
                    self.inner.state.set(TxState::Committed);
                    self.release_conn(true);
                    debug!("event=tx_commit module=tx status=ok depth=0");
                    Ok(())
                }
                Err(err) => {
                    // Durability is unknown; the connection must not serve
                    // anyone else.
                    self.inner.state.set(TxState::RolledBack);
                    self.release_conn(false);
                    Err(err)
                }
            }
        } else {
            let result =
                self.exec_control(&format!("RELEASE SAVEPOINT {};", self.savepoint_name()));
            match &result {
                Ok(()) => {
                    self.inner.state.set(TxState::Committed);
                    debug!("event=tx_commit module=tx status=ok depth={}", self.inner.depth);
                }
                Err(_) => self.inner.state.set(TxState::RolledBack),
            }
            result
        }
    }

    pub(crate) fn rollback(&self) -> DbResult<()> {
        self.assert_open("rollback");

        if self.inner.depth == 0 {
            let result = self.exec_control("ROLLBACK;");
            self.inner.state.set(TxState::RolledBack);
            self.release_conn(result.is_ok());
            result
        } else {
            let name = self.savepoint_name();
            let result = self.exec_control(&format!(
                "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name};"
            ));
            self.inner.state.set(TxState::RolledBack);
            result
        }
    }

    fn savepoint_name(&self) -> String {
        format!("roster_sp_{}", self.inner.depth)
    }

    fn assert_open(&self, operation: &str) {
        let state = self.inner.state.get();
        if state != TxState::Begun {
            panic!("transaction already {state}: cannot {operation}");
        }
    }

    fn exec_control(&self, sql: &str) -> DbResult<()> {
        self.with_open_conn(|conn| conn.execute_batch(sql))
    }

    fn with_open_conn<T>(
        &self,
        op: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> DbResult<T> {
        let guard = self.inner.conn.borrow();
        match guard.as_ref() {
            Some(conn) => op(conn).map_err(DbError::from),
            None => panic!("transaction connection already released by an enclosing transaction"),
        }
    }

    fn release_conn(&self, reusable: bool) {
        if let Some(mut conn) = self.inner.conn.borrow_mut().take() {
            if !reusable {
                conn.mark_unusable();
            }
        }
    }
}

/// Capability set shared by the pool and open transaction handles.
///
/// `begin` against the pool checks out a connection and opens a top-level
/// transaction; against a handle it opens a savepoint on the same
/// connection. Either way the caller receives a [`TxHandle`] with an
/// identical contract, which is what makes arbitrary nesting work.
pub trait ExecutionTarget {
    fn begin(&self, scope: &Scope) -> DbResult<TxHandle>;

    fn with_conn<T>(
        &self,
        scope: &Scope,
        op: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> DbResult<T>
    where
        Self: Sized;
}

impl ExecutionTarget for Arc<ConnectionPool> {
    fn begin(&self, scope: &Scope) -> DbResult<TxHandle> {
        let conn = ConnectionPool::checkout(self, scope)?;
        TxHandle::begin_top(conn)
    }

    fn with_conn<T>(
        &self,
        scope: &Scope,
        op: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> DbResult<T> {
        let conn = ConnectionPool::checkout(self, scope)?;
        op(&conn).map_err(DbError::from)
    }
}

impl ExecutionTarget for TxHandle {
    fn begin(&self, scope: &Scope) -> DbResult<TxHandle> {
        if scope.is_cancelled() {
            return Err(DbError::Canceled);
        }
        self.assert_open("begin a nested transaction");

        let depth = self.inner.depth + 1;
        self.exec_control(&format!("SAVEPOINT roster_sp_{depth};"))?;
        debug!("event=tx_begin module=tx status=ok depth={depth}");

        Ok(TxHandle {
            inner: Rc::new(TxInner {
                conn: Rc::clone(&self.inner.conn),
                depth,
                state: Cell::new(TxState::Begun),
            }),
        })
    }

    fn with_conn<T>(
        &self,
        scope: &Scope,
        op: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> DbResult<T> {
        if scope.is_cancelled() {
            return Err(DbError::Canceled);
        }
        self.assert_open("run a statement");
        self.with_open_conn(op)
    }
}

/// Resolved execution target for one operation.
#[derive(Clone)]
pub enum Db {
    Pool(Arc<ConnectionPool>),
    Tx(TxHandle),
}

impl ExecutionTarget for Db {
    fn begin(&self, scope: &Scope) -> DbResult<TxHandle> {
        match self {
            Self::Pool(pool) => pool.begin(scope),
            Self::Tx(handle) => handle.begin(scope),
        }
    }

    fn with_conn<T>(
        &self,
        scope: &Scope,
        op: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> DbResult<T> {
        match self {
            Self::Pool(pool) => pool.with_conn(scope, op),
            Self::Tx(handle) => handle.with_conn(scope, op),
        }
    }
}

/// Resolves the execution target that should serve a scope.
///
/// Repositories hold a resolver and stay agnostic of transaction state:
/// the nearest scope binding wins — an active handle when one is bound,
/// the pool otherwise (including under the no-transaction marker).
/// Resolution is a pure lookup and always succeeds.
#[derive(Clone)]
pub struct DbResolver {
    pool: Arc<ConnectionPool>,
}

impl DbResolver {
    pub(crate) fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    pub fn db(&self, scope: &Scope) -> Db {
        match scope.active_handle() {
            Some(handle) => Db::Tx(handle.clone()),
            None => Db::Pool(Arc::clone(&self.pool)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<ConnectionPool>, Scope) {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::open(&DbConfig::new(dir.path().join("target.db"))).unwrap();
        (dir, pool, Scope::new())
    }

    #[test]
    fn top_level_commit_persists_across_connections() {
        let (_dir, pool, scope) = setup();

        let handle = pool.begin(&scope).unwrap();
        handle
            .with_conn(&scope, |conn| {
                conn.execute(
                    "INSERT INTO users (id, username) VALUES ('t-1', 'target_probe');",
                    [],
                )
            })
            .unwrap();
        handle.commit().unwrap();
        assert_eq!(handle.state(), TxState::Committed);

        let count = pool
            .with_conn(&scope, |conn| {
                conn.query_row("SELECT COUNT(*) FROM users;", [], |row| row.get::<_, i64>(0))
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn rollback_discards_writes() {
        let (_dir, pool, scope) = setup();

        let handle = pool.begin(&scope).unwrap();
        handle
            .with_conn(&scope, |conn| {
                conn.execute(
                    "INSERT INTO users (id, username) VALUES ('t-2', 'target_probe');",
                    [],
                )
            })
            .unwrap();
        handle.rollback().unwrap();
        assert_eq!(handle.state(), TxState::RolledBack);

        let count = pool
            .with_conn(&scope, |conn| {
                conn.query_row("SELECT COUNT(*) FROM users;", [], |row| row.get::<_, i64>(0))
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    #[should_panic(expected = "transaction already committed")]
    fn statements_against_a_terminal_handle_panic() {
        let (_dir, pool, scope) = setup();

        let handle = pool.begin(&scope).unwrap();
        handle.commit().unwrap();

        let _ = handle.with_conn(&scope, |conn| {
            conn.query_row("SELECT 1;", [], |row| row.get::<_, i64>(0))
        });
    }

    #[test]
    fn nested_begin_shares_the_connection() {
        let (_dir, pool, scope) = setup();

        let outer = pool.begin(&scope).unwrap();
        outer
            .with_conn(&scope, |conn| {
                conn.execute(
                    "INSERT INTO users (id, username) VALUES ('t-3', 'outer_probe');",
                    [],
                )
            })
            .unwrap();

        let inner = outer.begin(&scope).unwrap();
        assert_eq!(inner.depth(), 1);

        // The savepoint sees the ancestor's uncommitted write.
        let count = inner
            .with_conn(&scope, |conn| {
                conn.query_row("SELECT COUNT(*) FROM users;", [], |row| row.get::<_, i64>(0))
            })
            .unwrap();
        assert_eq!(count, 1);

        inner.rollback().unwrap();
        outer.rollback().unwrap();
    }
}
