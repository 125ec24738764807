//! Core domain logic for Roster, a small user-directory service.
//! This crate is the single source of truth for business invariants and
//! for the ambient transaction machinery shared by every entry point.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod tx;

pub use config::{Config, ConfigError, DbConfig, LogConfig};
pub use db::{ConnectionPool, DbError, DbResult};
pub use logging::{default_log_level, init_logging, LogError};
pub use model::user::{User, UserId, UserValidationError};
pub use repo::user_repo::{RepoError, RepoResult, SqliteUserRepository, UserRepository};
pub use service::user_service::{CreateUserRequest, UserService};
pub use tx::{CancelToken, DbResolver, ExecutionTarget, Scope, Transactor, TxError};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
