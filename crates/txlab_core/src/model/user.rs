//! User domain model.
//!
//! # Responsibility
//! - Define the `User` record stored in the `users` table.
//! - Validate field constraints before any write reaches SQLite.
//!
//! # Invariants
//! - `email` is unique across all rows, soft-deleted rows included.
//! - `deleted_at` is the source of truth for tombstone state.
//! - `name` is non-blank and at most 255 characters.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Auto-assigned row identifier.
pub type UserId = i64;

pub const MAX_NAME_CHARS: usize = 255;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// Persisted user row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub age: i64,
    /// Points balance. May go negative; no invariant is enforced here.
    pub balance: i64,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds, bumped on every update.
    pub updated_at: i64,
    /// Soft delete tombstone in epoch milliseconds.
    pub deleted_at: Option<i64>,
}

impl User {
    /// Returns whether this user is visible to default reads.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Validates writable fields.
    pub fn validate(&self) -> Result<(), UserValidationError> {
        validate_fields(&self.name, &self.email, self.age)
    }
}

/// Insert payload; `id` and timestamps are assigned by storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub age: i64,
    pub balance: i64,
}

impl NewUser {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            age: 0,
            balance: 0,
        }
    }

    pub fn with_age(mut self, age: i64) -> Self {
        self.age = age;
        self
    }

    pub fn with_balance(mut self, balance: i64) -> Self {
        self.balance = balance;
        self
    }

    pub fn validate(&self) -> Result<(), UserValidationError> {
        validate_fields(&self.name, &self.email, self.age)
    }
}

/// Field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserValidationError {
    BlankName,
    NameTooLong { chars: usize },
    InvalidEmail(String),
    NegativeAge(i64),
}

impl Display for UserValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankName => write!(f, "user name must not be blank"),
            Self::NameTooLong { chars } => write!(
                f,
                "user name has {chars} characters; at most {MAX_NAME_CHARS} allowed"
            ),
            Self::InvalidEmail(email) => write!(f, "invalid email address `{email}`"),
            Self::NegativeAge(age) => write!(f, "age must not be negative, got {age}"),
        }
    }
}

impl Error for UserValidationError {}

pub(crate) fn validate_name(name: &str) -> Result<(), UserValidationError> {
    if name.trim().is_empty() {
        return Err(UserValidationError::BlankName);
    }
    let chars = name.chars().count();
    if chars > MAX_NAME_CHARS {
        return Err(UserValidationError::NameTooLong { chars });
    }
    Ok(())
}

pub(crate) fn validate_age(age: i64) -> Result<(), UserValidationError> {
    if age < 0 {
        return Err(UserValidationError::NegativeAge(age));
    }
    Ok(())
}

fn validate_fields(name: &str, email: &str, age: i64) -> Result<(), UserValidationError> {
    validate_name(name)?;
    if !EMAIL_RE.is_match(email) {
        return Err(UserValidationError::InvalidEmail(email.to_string()));
    }
    validate_age(age)
}

#[cfg(test)]
mod tests {
    use super::{NewUser, UserValidationError, MAX_NAME_CHARS};

    #[test]
    fn accepts_plain_user() {
        let user = NewUser::new("Potato", "potato@example.com").with_age(11);
        assert!(user.validate().is_ok());
    }

    #[test]
    fn rejects_blank_and_oversized_names() {
        let blank = NewUser::new("  ", "a@example.com");
        assert_eq!(blank.validate(), Err(UserValidationError::BlankName));

        let long = NewUser::new("x".repeat(MAX_NAME_CHARS + 1), "a@example.com");
        assert!(matches!(
            long.validate(),
            Err(UserValidationError::NameTooLong { .. })
        ));
    }

    #[test]
    fn rejects_malformed_email_and_negative_age() {
        let bad_email = NewUser::new("Tomato", "tomato.example.com");
        assert!(matches!(
            bad_email.validate(),
            Err(UserValidationError::InvalidEmail(_))
        ));

        let bad_age = NewUser::new("Tomato", "tomato@example.com").with_age(-1);
        assert_eq!(bad_age.validate(), Err(UserValidationError::NegativeAge(-1)));
    }
}
