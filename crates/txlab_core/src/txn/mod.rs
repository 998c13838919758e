//! Outer transactions with named savepoints.
//!
//! # Responsibility
//! - Sequence one outer transaction per connection.
//! - Create savepoints explicitly or implicitly and roll back to them when
//!   a nested unit of work fails, keeping the outer transaction alive.
//!
//! # Invariants
//! - A savepoint name is unique within its transaction's lifetime.
//! - A failed rollback-to-savepoint always rolls back the whole transaction.
//! - A `Transaction` dropped while active rolls back.

mod manager;
mod nested;
mod transaction;

pub use manager::TransactionManager;
pub use nested::{NestedOutcome, NestedTransactionRunner, SavepointMode};
pub use transaction::{Transaction, TxState};

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type TxResult<T> = Result<T, TxError>;

#[derive(Debug)]
pub enum TxError {
    /// No usable connection: closed, failed to open, or `BEGIN` refused.
    Connection {
        reason: &'static str,
        source: Option<DbError>,
    },
    /// Operation attempted on a transaction that does not allow it.
    InvalidState {
        operation: &'static str,
        state: TxState,
    },
    DuplicateName(String),
    /// Savepoint name is not a plain SQL identifier.
    InvalidName(String),
    /// Savepoint is not currently active in this transaction.
    UnknownSavepoint(String),
    /// The engine rejected `COMMIT`; the transaction was rolled back.
    Commit(rusqlite::Error),
    /// Rollback-to-savepoint failed; the transaction was rolled back.
    Rollback { savepoint: String, reason: String },
    /// A nested unit of work failed under the propagate policy; the
    /// transaction was rolled back.
    Nested { savepoint: String, message: String },
    Sql(rusqlite::Error),
}

impl Display for TxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection {
                reason,
                source: Some(err),
            } => write!(f, "connection unavailable ({reason}): {err}"),
            Self::Connection {
                reason,
                source: None,
            } => write!(f, "connection unavailable ({reason})"),
            Self::InvalidState { operation, state } => {
                write!(f, "cannot {operation}: transaction is {state}")
            }
            Self::DuplicateName(name) => {
                write!(f, "savepoint `{name}` already exists in this transaction")
            }
            Self::InvalidName(name) => write!(f, "invalid savepoint name `{name}`"),
            Self::UnknownSavepoint(name) => write!(f, "savepoint `{name}` is not active"),
            Self::Commit(err) => write!(f, "commit rejected: {err}"),
            Self::Rollback { savepoint, reason } => write!(
                f,
                "rollback to savepoint `{savepoint}` failed ({reason}); transaction rolled back"
            ),
            Self::Nested { savepoint, message } => write!(
                f,
                "nested operation under `{savepoint}` failed: {message}; transaction rolled back"
            ),
            Self::Sql(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TxError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Connection {
                source: Some(err), ..
            } => Some(err),
            Self::Commit(err) | Self::Sql(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for TxError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}
