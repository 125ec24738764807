//! User use-case service.
//!
//! # Responsibility
//! - Provide stable CRUD entry points for outer layers.
//! - Own the transaction boundary: multi-step repository work runs inside
//!   one ambient transaction.
//!
//! # Invariants
//! - Service APIs never bypass repository validation/persistence contracts.
//! - The service remains storage-agnostic; it sees only the repository
//!   trait and the transactor.

use crate::model::user::{User, UserId};
use crate::repo::user_repo::{RepoResult, UserRepository};
use crate::tx::{Scope, Transactor};
use serde::{Deserialize, Serialize};

/// Request model for creating a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
}

/// Use-case service for user CRUD operations.
pub struct UserService<R: UserRepository> {
    repo: R,
    transactor: Transactor,
}

impl<R: UserRepository> UserService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R, transactor: Transactor) -> Self {
        Self { repo, transactor }
    }

    /// Creates a new user and returns the persisted record.
    ///
    /// # Contract
    /// - Insert and read-back happen atomically in one transaction; the
    ///   returned `created_at` is the database-assigned value.
    /// - Joins an ambient transaction when `scope` carries one.
    pub fn create_user(&self, scope: &Scope, request: &CreateUserRequest) -> RepoResult<User> {
        let user = User::new(request.username.as_str());

        self.transactor.in_transaction(scope, |tx_scope| {
            self.repo.create(tx_scope, &user)?;
            self.repo.get_by_id(tx_scope, user.id)
        })
    }

    /// Gets one user by stable ID.
    ///
    /// Returns repository-level not-found errors unchanged.
    pub fn get_user(&self, scope: &Scope, id: UserId) -> RepoResult<User> {
        self.repo.get_by_id(scope, id)
    }
}
