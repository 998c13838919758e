use super::{Transaction, TxError, TxResult};
use crate::config::NestedFailurePolicy;
use crate::logging::sanitize_message;
use log::{debug, error, warn};
use rusqlite::Connection;
use std::fmt::Display;
use uuid::Uuid;

const MAX_ERROR_CHARS: usize = 200;

/// Who owns the savepoint guarding a nested unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavepointMode {
    /// The caller created this savepoint beforehand and decides what to do
    /// on failure, normally `Transaction::rollback_to(name)`.
    Explicit(String),
    /// The runner creates an anonymous savepoint, releases it on success and
    /// rolls back to it on failure.
    Implicit,
}

/// Result of a nested unit of work that did not break the outer transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NestedOutcome<T, E> {
    Completed(T),
    /// Explicit mode only: the work failed and its effects are still in
    /// place until the caller rolls back to the savepoint.
    Failed { savepoint: String, error: E },
    /// Implicit mode only: the work failed and was already rolled back.
    RolledBack(E),
}

impl<T, E> NestedOutcome<T, E> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Completed(_) => None,
            Self::Failed { error, .. } | Self::RolledBack(error) => Some(error),
        }
    }
}

/// Runs a unit of work nested inside an outer transaction.
pub trait NestedTransactionRunner {
    /// Runs `work` under the savepoint selected by `mode`.
    ///
    /// `work` signals semantic failure (for example zero rows affected) by
    /// returning `Err`; it never has to touch savepoints itself.
    ///
    /// # Errors
    /// - `InvalidState` when the transaction is not active.
    /// - `UnknownSavepoint` when an explicit savepoint is not open.
    /// - `Rollback` when the implicit savepoint cannot be restored.
    /// - `Nested` when implicit work failed under
    ///   `NestedFailurePolicy::Propagate`.
    fn run_nested<T, E, F>(
        &mut self,
        mode: &SavepointMode,
        work: F,
    ) -> TxResult<NestedOutcome<T, E>>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: Display;
}

impl NestedTransactionRunner for Transaction<'_> {
    fn run_nested<T, E, F>(
        &mut self,
        mode: &SavepointMode,
        work: F,
    ) -> TxResult<NestedOutcome<T, E>>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: Display,
    {
        let conn = self.connection()?;
        let savepoint = match mode {
            SavepointMode::Explicit(name) => {
                if !self.has_savepoint(name) {
                    return Err(TxError::UnknownSavepoint(name.clone()));
                }
                name.clone()
            }
            SavepointMode::Implicit => {
                let name = format!("sp_auto_{}", Uuid::new_v4().simple());
                self.savepoint(&name)?;
                name
            }
        };

        let error = match work(conn) {
            Ok(value) => {
                if matches!(mode, SavepointMode::Implicit) {
                    self.release(&savepoint)?;
                }
                debug!(
                    "event=nested_tx module=txn status=ok tx_id={} savepoint={savepoint}",
                    self.id()
                );
                return Ok(NestedOutcome::Completed(value));
            }
            Err(error) => error,
        };

        let message = sanitize_message(&error.to_string(), MAX_ERROR_CHARS);
        warn!(
            "event=nested_tx module=txn status=error tx_id={} savepoint={savepoint} error={message}",
            self.id()
        );

        if let SavepointMode::Explicit(_) = mode {
            return Ok(NestedOutcome::Failed { savepoint, error });
        }

        self.rollback_to(&savepoint)?;
        match self.policy() {
            NestedFailurePolicy::Contain => Ok(NestedOutcome::RolledBack(error)),
            NestedFailurePolicy::Propagate => {
                error!(
                    "event=nested_tx module=txn status=error tx_id={} savepoint={savepoint} policy=propagate escalation=full_rollback",
                    self.id()
                );
                self.rollback()?;
                Err(TxError::Nested { savepoint, message })
            }
        }
    }
}
