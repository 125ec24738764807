//! Bounded SQLite connection pool.
//!
//! # Responsibility
//! - Open, bootstrap and recycle the process's SQLite connections.
//! - Run schema migrations once, before the pool serves any caller.
//!
//! # Invariants
//! - At most `max_conns` connections exist at any moment.
//! - Checked-in connections are always idle (`is_autocommit`); a connection
//!   still inside a transaction is discarded instead of reused.
//! - In-memory pools hold exactly one connection (each in-memory connection
//!   would otherwise be a separate database).

use crate::config::{DbConfig, DEFAULT_BUSY_TIMEOUT};
use crate::db::migrations::apply_migrations;
use crate::db::{DbError, DbResult};
use crate::tx::scope::{CancelRegistration, Scope};
use log::{error, info};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum DbLocation {
    File(PathBuf),
    Memory,
}

impl DbLocation {
    fn mode(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Memory => "memory",
        }
    }
}

#[derive(Default)]
struct PoolState {
    idle: Vec<Connection>,
    /// Idle plus checked-out connections.
    open: usize,
}

/// Shared, bounded pool of SQLite connections over one database.
///
/// The pool is the only database resource shared across threads; everything
/// checked out of it is exclusively owned until dropped.
pub struct ConnectionPool {
    location: DbLocation,
    max_conns: usize,
    busy_timeout: Duration,
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("location", &self.location)
            .field("max_conns", &self.max_conns)
            .field("busy_timeout", &self.busy_timeout)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Opens a file-backed pool and applies all pending migrations.
    ///
    /// # Side effects
    /// - Emits `db_pool_open` logging events with duration and status.
    pub fn open(config: &DbConfig) -> DbResult<Arc<Self>> {
        Self::build(
            DbLocation::File(config.path.clone()),
            config.max_conns.max(1),
            config.busy_timeout,
        )
    }

    /// Opens an in-memory pool, capped at a single connection.
    pub fn open_in_memory() -> DbResult<Arc<Self>> {
        Self::build(DbLocation::Memory, 1, DEFAULT_BUSY_TIMEOUT)
    }

    fn build(location: DbLocation, max_conns: usize, busy_timeout: Duration) -> DbResult<Arc<Self>> {
        let started_at = Instant::now();
        let mode = location.mode();
        info!("event=db_pool_open module=db status=start mode={mode} max_conns={max_conns}");

        let pool = Arc::new(Self {
            location,
            max_conns,
            busy_timeout,
            state: Mutex::new(PoolState::default()),
        });

        let bootstrap = || -> DbResult<()> {
            let mut conn = pool.open_connection()?;
            apply_migrations(&mut conn)?;
            let mut state = pool.state.lock();
            state.open = 1;
            state.idle.push(conn);
            Ok(())
        };

        match bootstrap() {
            Ok(()) => {
                info!(
                    "event=db_pool_open module=db status=ok mode={mode} duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(pool)
            }
            Err(err) => {
                error!(
                    "event=db_pool_open module=db status=error mode={mode} duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    /// Checks a connection out of the pool for exclusive use.
    ///
    /// Fails fast with [`DbError::PoolExhausted`] when every connection is in
    /// use, and with [`DbError::Canceled`] when the scope's cancellation
    /// token has fired. The connection's interrupt handle stays registered
    /// with the token until the guard is dropped.
    pub fn checkout(pool: &Arc<Self>, scope: &Scope) -> DbResult<PooledConn> {
        if scope.is_cancelled() {
            return Err(DbError::Canceled);
        }

        let reused = {
            let mut state = pool.state.lock();
            if let Some(conn) = state.idle.pop() {
                Some(conn)
            } else if state.open < pool.max_conns {
                state.open += 1;
                None
            } else {
                return Err(DbError::PoolExhausted {
                    max_conns: pool.max_conns,
                });
            }
        };

        let conn = match reused {
            Some(conn) => conn,
            // The slot was reserved above; release it if the open fails.
            None => match pool.open_connection() {
                Ok(conn) => conn,
                Err(err) => {
                    pool.state.lock().open -= 1;
                    return Err(err);
                }
            },
        };

        let registration = scope.cancel_token().register(conn.get_interrupt_handle());

        Ok(PooledConn {
            conn: Some(conn),
            pool: Arc::clone(pool),
            unusable: false,
            _cancel: registration,
        })
    }

    fn open_connection(&self) -> DbResult<Connection> {
        let conn = match &self.location {
            DbLocation::File(path) => Connection::open(path)?,
            DbLocation::Memory => Connection::open_in_memory()?,
        };

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(self.busy_timeout)?;
        if matches!(self.location, DbLocation::File(_)) {
            // WAL keeps readers on other connections unblocked while a
            // transaction writes.
            conn.query_row("PRAGMA journal_mode = WAL;", [], |row| {
                row.get::<_, String>(0)
            })?;
        }

        Ok(conn)
    }

    fn checkin(&self, conn: Connection) {
        // A connection still inside a transaction must not serve another
        // caller; drop it and let the pool reopen on demand.
        if !conn.is_autocommit() {
            error!("event=db_checkin module=db status=error reason=open_transaction action=discard");
            self.discard(conn);
            return;
        }
        self.state.lock().idle.push(conn);
    }

    fn discard(&self, conn: Connection) {
        drop(conn);
        self.state.lock().open -= 1;
    }
}

/// Exclusive guard over one pooled connection.
///
/// Dereferences to [`rusqlite::Connection`]; the connection returns to the
/// pool when the guard is dropped, unless it was marked unusable.
pub struct PooledConn {
    conn: Option<Connection>,
    pool: Arc<ConnectionPool>,
    unusable: bool,
    _cancel: CancelRegistration,
}

impl std::fmt::Debug for PooledConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConn")
            .field("unusable", &self.unusable)
            .finish_non_exhaustive()
    }
}

impl PooledConn {
    /// Flags the connection to be discarded instead of recycled.
    ///
    /// Used after failures that leave connection state unknown, e.g. a
    /// failed commit.
    pub(crate) fn mark_unusable(&mut self) {
        self.unusable = true;
    }
}

impl Deref for PooledConn {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
            .as_ref()
            .expect("pooled connection accessed after release")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else { return };
        if self.unusable {
            self.pool.discard(conn);
        } else {
            self.pool.checkin(conn);
        }
    }
}
