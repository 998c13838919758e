use super::{Transaction, TxError, TxResult};
use crate::config::{DataSource, NestedFailurePolicy};
use crate::db::open_db_at;
use log::{error, info};
use rusqlite::Connection;

/// Owns the connection and hands out outer transactions.
///
/// The connection is passed in (or opened) explicitly; there is no
/// process-wide handle, so each test can use its own in-memory database.
pub struct TransactionManager {
    conn: Option<Connection>,
    policy: NestedFailurePolicy,
}

impl TransactionManager {
    /// Wraps an already opened and migrated connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Some(conn),
            policy: NestedFailurePolicy::default(),
        }
    }

    /// Opens `source`, applies migrations and wraps the connection.
    ///
    /// # Errors
    /// - `Connection` when the database cannot be opened or migrated.
    pub fn open(source: &DataSource) -> TxResult<Self> {
        let conn = open_db_at(source).map_err(|err| TxError::Connection {
            reason: "open failed",
            source: Some(err),
        })?;
        Ok(Self::new(conn))
    }

    /// Sets the policy applied when implicit nested work fails.
    pub fn with_policy(mut self, policy: NestedFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> NestedFailurePolicy {
        self.policy
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    pub fn connection(&self) -> TxResult<&Connection> {
        self.conn.as_ref().ok_or(TxError::Connection {
            reason: "connection closed",
            source: None,
        })
    }

    /// Mutable access for schema work such as `db::reset_schema`.
    pub fn connection_mut(&mut self) -> TxResult<&mut Connection> {
        self.conn.as_mut().ok_or(TxError::Connection {
            reason: "connection closed",
            source: None,
        })
    }

    /// Opens a new outer transaction.
    ///
    /// # Errors
    /// - `Connection` when the manager is closed or SQLite refuses `BEGIN`.
    /// - `InvalidState` when a transaction is already open on the connection.
    pub fn begin(&self) -> TxResult<Transaction<'_>> {
        Transaction::begin(self.connection()?, self.policy)
    }

    /// Closes the connection. Later `begin` calls fail with `Connection`.
    ///
    /// Closing an already closed manager is a no-op. On failure the
    /// connection stays open and usable.
    pub fn close(&mut self) -> TxResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        match conn.close() {
            Ok(()) => {
                info!("event=db_close module=txn status=ok");
                Ok(())
            }
            Err((conn, err)) => {
                error!("event=db_close module=txn status=error error={err}");
                self.conn = Some(conn);
                Err(TxError::Connection {
                    reason: "close failed",
                    source: Some(err.into()),
                })
            }
        }
    }
}
