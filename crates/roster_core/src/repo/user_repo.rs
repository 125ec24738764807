//! User repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide stable CRUD APIs over canonical `users` storage.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Write paths must call `User::validate()` before SQL mutations.
//! - Read paths must reject invalid persisted state instead of masking it.
//! - Every query goes through the ambient target resolver; the repository
//!   never knows whether a transaction is active.

use crate::db::DbError;
use crate::model::user::{User, UserId, UserValidationError};
use crate::tx::{DbResolver, ExecutionTarget, Scope, TxError};
use rusqlite::{params, ErrorCode};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const USER_SELECT_SQL: &str = "SELECT id, username, created_at FROM users";

pub type RepoResult<T> = Result<T, RepoError>;

/// Generic repository error for user persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(UserValidationError),
    Db(DbError),
    Tx(TxError),
    NotFound(UserId),
    AlreadyExists(String),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Tx(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "user not found: {id}"),
            Self::AlreadyExists(username) => write!(f, "user already exists: {username}"),
            Self::InvalidData(message) => write!(f, "invalid persisted user data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Tx(err) => Some(err),
            Self::NotFound(_) | Self::AlreadyExists(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<UserValidationError> for RepoError {
    fn from(value: UserValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<TxError> for RepoError {
    fn from(value: TxError) -> Self {
        Self::Tx(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for user CRUD operations.
pub trait UserRepository {
    fn create(&self, scope: &Scope, user: &User) -> RepoResult<()>;
    fn get_by_id(&self, scope: &Scope, id: UserId) -> RepoResult<User>;
}

/// SQLite-backed user repository.
///
/// Holds only the target resolver; whether statements run on the pool or
/// inside an ambient transaction is decided per call by the scope.
pub struct SqliteUserRepository {
    resolver: DbResolver,
}

impl SqliteUserRepository {
    pub fn new(resolver: DbResolver) -> Self {
        Self { resolver }
    }
}

impl UserRepository for SqliteUserRepository {
    fn create(&self, scope: &Scope, user: &User) -> RepoResult<()> {
        user.validate()?;

        let result = self.resolver.db(scope).with_conn(scope, |conn| {
            conn.execute(
                "INSERT INTO users (id, username) VALUES (?1, ?2);",
                params![user.id.to_string(), user.username.as_str()],
            )
        });

        match result {
            Ok(_) => Ok(()),
            Err(DbError::Sqlite(err)) if is_unique_violation(&err) => {
                Err(RepoError::AlreadyExists(user.username.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn get_by_id(&self, scope: &Scope, id: UserId) -> RepoResult<User> {
        let result = self.resolver.db(scope).with_conn(scope, |conn| {
            conn.query_row(
                &format!("{USER_SELECT_SQL} WHERE id = ?1;"),
                [id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
        });

        match result {
            Ok((id_text, username, created_at)) => parse_user_row(&id_text, username, created_at),
            Err(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows)) => {
                Err(RepoError::NotFound(id))
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn parse_user_row(id_text: &str, username: String, created_at: i64) -> RepoResult<User> {
    let id = Uuid::parse_str(id_text).map_err(|_| {
        RepoError::InvalidData(format!("invalid uuid value `{id_text}` in users.id"))
    })?;

    let user = User {
        id,
        username,
        created_at,
    };
    user.validate()?;
    Ok(user)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
}
