use super::{TxError, TxResult};
use crate::config::NestedFailurePolicy;
use crate::logging::sanitize_message;
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{Connection, TransactionBehavior};
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

const MAX_ERROR_CHARS: usize = 200;

static SAVEPOINT_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("valid savepoint name regex")
});

/// Lifecycle state of an outer transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

impl TxState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl Display for TxState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outer transaction bound to one connection.
///
/// Created by `TransactionManager::begin`. Commit, rollback and savepoint
/// operations take `&mut self` so the state stays inspectable afterwards;
/// anything but `state()` on a finished transaction is `InvalidState`.
pub struct Transaction<'conn> {
    conn: &'conn Connection,
    // `None` once committed or rolled back. Dropping it while the engine
    // still has a transaction open issues ROLLBACK.
    inner: Option<rusqlite::Transaction<'conn>>,
    state: TxState,
    policy: NestedFailurePolicy,
    tx_id: String,
    active_savepoints: Vec<String>,
    used_names: HashSet<String>,
}

impl<'conn> Transaction<'conn> {
    pub(super) fn begin(conn: &'conn Connection, policy: NestedFailurePolicy) -> TxResult<Self> {
        if !conn.is_autocommit() {
            return Err(TxError::InvalidState {
                operation: "begin",
                state: TxState::Active,
            });
        }

        let tx_id = Uuid::new_v4().simple().to_string();
        let inner = rusqlite::Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
            .map_err(|err| {
                error!(
                    "event=tx_begin module=txn status=error tx_id={tx_id} error={}",
                    sanitize_message(&err.to_string(), MAX_ERROR_CHARS)
                );
                TxError::Connection {
                    reason: "begin refused",
                    source: Some(err.into()),
                }
            })?;
        debug!("event=tx_begin module=txn status=ok tx_id={tx_id}");

        Ok(Self {
            conn,
            inner: Some(inner),
            state: TxState::Active,
            policy,
            tx_id,
            active_savepoints: Vec::new(),
            used_names: HashSet::new(),
        })
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }

    /// Identifier used in log lines for this transaction.
    pub fn id(&self) -> &str {
        &self.tx_id
    }

    pub fn policy(&self) -> NestedFailurePolicy {
        self.policy
    }

    /// Savepoints currently open, outermost first.
    pub fn savepoints(&self) -> &[String] {
        &self.active_savepoints
    }

    /// Connection to issue statements on while the transaction is active.
    pub fn connection(&self) -> TxResult<&'conn Connection> {
        self.ensure_active("use connection")?;
        Ok(self.conn)
    }

    /// Creates a named savepoint.
    ///
    /// # Errors
    /// - `InvalidState` when the transaction is not active.
    /// - `InvalidName` when `name` is not a plain identifier.
    /// - `DuplicateName` when `name` was already used in this transaction,
    ///   even if that savepoint has since been released or rolled back.
    pub fn savepoint(&mut self, name: &str) -> TxResult<()> {
        self.ensure_active("create savepoint")?;
        if !SAVEPOINT_NAME_RE.is_match(name) {
            return Err(TxError::InvalidName(name.to_string()));
        }
        // SQLite matches savepoint names case-insensitively.
        let key = name.to_ascii_lowercase();
        if self.used_names.contains(&key) {
            return Err(TxError::DuplicateName(name.to_string()));
        }

        self.conn.execute_batch(&format!("SAVEPOINT \"{name}\";"))?;
        self.used_names.insert(key);
        self.active_savepoints.push(name.to_string());
        debug!(
            "event=tx_savepoint module=txn status=ok tx_id={} savepoint={name} depth={}",
            self.tx_id,
            self.active_savepoints.len()
        );
        Ok(())
    }

    /// Reverts everything issued after `name` and releases the savepoint.
    ///
    /// Savepoints opened after `name` are discarded as well. Work issued
    /// before `name` is kept and the transaction stays active.
    ///
    /// # Errors
    /// - `InvalidState` when the transaction is not active.
    /// - `Rollback` when `name` is not active or the engine rejects the
    ///   rollback. The whole transaction is rolled back first.
    pub fn rollback_to(&mut self, name: &str) -> TxResult<()> {
        self.ensure_active("roll back to savepoint")?;

        let Some(position) = self.savepoint_position(name) else {
            return Err(self.escalate(name, "savepoint is not active".to_string()));
        };

        if let Err(err) = self
            .conn
            .execute_batch(&format!(
                "ROLLBACK TO SAVEPOINT \"{name}\"; RELEASE SAVEPOINT \"{name}\";"
            ))
        {
            return Err(self.escalate(name, err.to_string()));
        }

        self.active_savepoints.truncate(position);
        info!(
            "event=tx_rollback_to module=txn status=ok tx_id={} savepoint={name}",
            self.tx_id
        );
        Ok(())
    }

    /// Releases `name`, folding its changes (and those of any savepoint
    /// opened after it) into the enclosing scope.
    pub fn release(&mut self, name: &str) -> TxResult<()> {
        self.ensure_active("release savepoint")?;
        let Some(position) = self.savepoint_position(name) else {
            return Err(TxError::UnknownSavepoint(name.to_string()));
        };

        self.conn
            .execute_batch(&format!("RELEASE SAVEPOINT \"{name}\";"))?;
        self.active_savepoints.truncate(position);
        debug!(
            "event=tx_release module=txn status=ok tx_id={} savepoint={name}",
            self.tx_id
        );
        Ok(())
    }

    /// Commits every change made in this transaction.
    ///
    /// # Errors
    /// - `InvalidState` when the transaction is not active.
    /// - `Commit` when the engine rejects the commit; the transaction is
    ///   rolled back and ends in `RolledBack`.
    pub fn commit(&mut self) -> TxResult<()> {
        self.ensure_active("commit")?;
        let started_at = Instant::now();
        let inner = self.take_inner()?;
        self.active_savepoints.clear();

        match inner.commit() {
            Ok(()) => {
                self.state = TxState::Committed;
                info!(
                    "event=tx_commit module=txn status=ok tx_id={} duration_ms={}",
                    self.tx_id,
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                self.state = TxState::RolledBack;
                error!(
                    "event=tx_commit module=txn status=error tx_id={} duration_ms={} error={}",
                    self.tx_id,
                    started_at.elapsed().as_millis(),
                    sanitize_message(&err.to_string(), MAX_ERROR_CHARS)
                );
                Err(TxError::Commit(err))
            }
        }
    }

    /// Aborts the whole transaction, savepoints included.
    pub fn rollback(&mut self) -> TxResult<()> {
        self.ensure_active("roll back")?;
        let inner = self.take_inner()?;
        self.active_savepoints.clear();
        self.state = TxState::RolledBack;

        inner.rollback().map_err(|err| {
            error!(
                "event=tx_rollback module=txn status=error tx_id={} error={}",
                self.tx_id,
                sanitize_message(&err.to_string(), MAX_ERROR_CHARS)
            );
            TxError::Sql(err)
        })?;
        info!("event=tx_rollback module=txn status=ok tx_id={}", self.tx_id);
        Ok(())
    }

    pub(super) fn ensure_active(&self, operation: &'static str) -> TxResult<()> {
        if self.state != TxState::Active {
            return Err(TxError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    pub(super) fn has_savepoint(&self, name: &str) -> bool {
        self.savepoint_position(name).is_some()
    }

    fn savepoint_position(&self, name: &str) -> Option<usize> {
        self.active_savepoints
            .iter()
            .rposition(|active| active.eq_ignore_ascii_case(name))
    }

    fn take_inner(&mut self) -> TxResult<rusqlite::Transaction<'conn>> {
        self.inner.take().ok_or(TxError::InvalidState {
            operation: "finish",
            state: self.state,
        })
    }

    /// Rolls back everything after a failed rollback-to-savepoint.
    fn escalate(&mut self, savepoint: &str, reason: String) -> TxError {
        error!(
            "event=tx_rollback_to module=txn status=error tx_id={} savepoint={savepoint} error={} escalation=full_rollback",
            self.tx_id,
            sanitize_message(&reason, MAX_ERROR_CHARS)
        );
        if let Err(err) = self.rollback() {
            error!(
                "event=tx_rollback module=txn status=error tx_id={} error={}",
                self.tx_id, err
            );
        }
        TxError::Rollback {
            savepoint: savepoint.to_string(),
            reason,
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            warn!(
                "event=tx_drop module=txn status=rollback tx_id={} open_savepoints={}",
                self.tx_id,
                self.active_savepoints.len()
            );
        }
    }
}
