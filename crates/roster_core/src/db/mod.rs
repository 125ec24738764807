//! SQLite storage bootstrap: pooling and schema migrations.
//!
//! # Responsibility
//! - Own every SQLite connection the process opens.
//! - Apply schema migrations in deterministic order before use.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - No application data is read or written before migrations succeed.
//! - Connections flagged unusable never re-enter the pool.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod pool;

pub use pool::{ConnectionPool, PooledConn};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    PoolExhausted {
        max_conns: usize,
    },
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    Canceled,
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::PoolExhausted { max_conns } => write!(
                f,
                "connection pool exhausted: all {max_conns} connections are in use"
            ),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::Canceled => write!(f, "database operation canceled by caller"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
