//! User domain model.
//!
//! # Responsibility
//! - Define the canonical user record and its identity rules.
//! - Validate username shape before anything reaches storage.
//!
//! # Invariants
//! - `id` is stable and never reused for another user.
//! - `created_at` is assigned by the database on insert; a zero value means
//!   the record has not been persisted yet.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for a user.
///
/// Kept as a type alias to make semantic intent explicit in signatures.
pub type UserId = Uuid;

pub const USERNAME_MIN_CHARS: usize = 3;
pub const USERNAME_MAX_CHARS: usize = 32;

/// Canonical user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable global ID, time-ordered (UUID v7) for index locality.
    pub id: UserId,
    /// Login name; unique regardless of case.
    pub username: String,
    /// Unix epoch milliseconds, assigned by the database on insert.
    pub created_at: i64,
}

impl User {
    /// Creates a new, not-yet-persisted user with a generated stable ID.
    pub fn new(username: impl Into<String>) -> Self {
        Self::with_id(Uuid::now_v7(), username)
    }

    /// Creates a user with a caller-provided stable ID.
    ///
    /// Used by import paths where identity already exists externally.
    pub fn with_id(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            created_at: 0,
        }
    }

    /// Validates the username shape.
    ///
    /// # Contract
    /// - Length within [`USERNAME_MIN_CHARS`]..=[`USERNAME_MAX_CHARS`].
    /// - First character is ASCII alphanumeric.
    /// - Remaining characters are ASCII alphanumeric or `.`, `_`, `-`.
    pub fn validate(&self) -> Result<(), UserValidationError> {
        let username = self.username.as_str();
        if username.is_empty() {
            return Err(UserValidationError::EmptyUsername);
        }

        let len = username.chars().count();
        if len < USERNAME_MIN_CHARS {
            return Err(UserValidationError::UsernameTooShort { len });
        }
        if len > USERNAME_MAX_CHARS {
            return Err(UserValidationError::UsernameTooLong { len });
        }

        let mut chars = username.chars();
        let first = chars.next().unwrap_or_default();
        if !first.is_ascii_alphanumeric() {
            return Err(UserValidationError::InvalidFirstChar { ch: first });
        }
        for ch in chars {
            if !ch.is_ascii_alphanumeric() && !matches!(ch, '.' | '_' | '-') {
                return Err(UserValidationError::InvalidChar { ch });
            }
        }

        Ok(())
    }
}

/// Username shape violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserValidationError {
    EmptyUsername,
    UsernameTooShort { len: usize },
    UsernameTooLong { len: usize },
    InvalidFirstChar { ch: char },
    InvalidChar { ch: char },
}

impl Display for UserValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyUsername => write!(f, "username cannot be empty"),
            Self::UsernameTooShort { len } => write!(
                f,
                "username has {len} characters; minimum is {USERNAME_MIN_CHARS}"
            ),
            Self::UsernameTooLong { len } => write!(
                f,
                "username has {len} characters; maximum is {USERNAME_MAX_CHARS}"
            ),
            Self::InvalidFirstChar { ch } => {
                write!(f, "username must start with a letter or digit, got `{ch}`")
            }
            Self::InvalidChar { ch } => write!(
                f,
                "username may only contain letters, digits, `.`, `_` and `-`, got `{ch}`"
            ),
        }
    }
}

impl Error for UserValidationError {}
