//! Scripted walkthroughs over the user table.
//!
//! # Responsibility
//! - CRUD walkthrough: reset, bulk create, read, save, single-field and
//!   multi-field updates, soft delete.
//! - Savepoint walkthrough: the explicit and implicit savepoint examples
//!   sharing one code path that differs only in `SavepointMode`.
//!
//! # Invariants
//! - Setup failures (schema, connection, transaction control) are fatal and
//!   returned with the failing step.
//! - Recoverable failures are logged and recorded in the report, never
//!   dropped silently.

use crate::db::{reset_schema, DbError};
use crate::model::user::{NewUser, User};
use crate::repo::user_repo::{SqliteUserRepository, UserChanges, UserFilter};
use crate::service::user_service::{UserService, UserServiceError};
use crate::txn::{NestedOutcome, NestedTransactionRunner, SavepointMode, TransactionManager, TxError};
use log::{error, info, warn};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Name targeted by the nested update; no such user ever exists.
pub const MISSING_USER_NAME: &str = "NonExistentUser";
pub const EXPLICIT_SAVEPOINT: &str = "sp_explicit";
const STARTING_BALANCE: i64 = 100;
const NESTED_BALANCE: i64 = 500;

pub type WalkthroughResult<T> = Result<T, WalkthroughError>;

#[derive(Debug)]
pub enum WalkthroughFailure {
    Db(DbError),
    Tx(TxError),
    Service(UserServiceError),
}

impl Display for WalkthroughFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Tx(err) => write!(f, "{err}"),
            Self::Service(err) => write!(f, "{err}"),
        }
    }
}

impl From<DbError> for WalkthroughFailure {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<TxError> for WalkthroughFailure {
    fn from(value: TxError) -> Self {
        Self::Tx(value)
    }
}

impl From<UserServiceError> for WalkthroughFailure {
    fn from(value: UserServiceError) -> Self {
        Self::Service(value)
    }
}

/// Fatal walkthrough failure tagged with the step that produced it.
#[derive(Debug)]
pub struct WalkthroughError {
    pub step: &'static str,
    pub failure: WalkthroughFailure,
}

impl Display for WalkthroughError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.step, self.failure)
    }
}

impl Error for WalkthroughError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.failure {
            WalkthroughFailure::Db(err) => Some(err),
            WalkthroughFailure::Tx(err) => Some(err),
            WalkthroughFailure::Service(err) => Some(err),
        }
    }
}

fn fatal(step: &'static str, failure: impl Into<WalkthroughFailure>) -> WalkthroughError {
    let failure = failure.into();
    error!("event=walkthrough_step module=service status=error step={step} error={failure}");
    WalkthroughError { step, failure }
}

/// Recoverable failure recorded by the CRUD walkthrough.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct CrudReport {
    pub created: Vec<User>,
    pub listed_after_create: Vec<User>,
    pub final_users: Vec<User>,
    pub failures: Vec<StepFailure>,
}

impl CrudReport {
    fn record(&mut self, step: &'static str, err: impl Display) {
        warn!("event=walkthrough_step module=service status=error step={step} error={err}");
        self.failures.push(StepFailure {
            step,
            message: err.to_string(),
        });
    }
}

/// Users created by the CRUD walkthrough's bulk insert.
pub fn seed_users() -> Vec<NewUser> {
    vec![
        NewUser::new("Potato", "potato@example.com").with_age(11),
        NewUser::new("Tomato", "tomato@example.com").with_age(12),
        NewUser::new("Carrot", "carrot@example.com").with_age(13),
    ]
}

/// Drops and recreates the schema, then exercises every CRUD path.
///
/// Only the schema reset and the bulk insert are fatal; later steps record
/// their failure and the walkthrough continues.
pub fn run_crud_walkthrough(conn: &mut Connection) -> WalkthroughResult<CrudReport> {
    info!("event=walkthrough module=service status=start name=crud");
    reset_schema(conn).map_err(|err| fatal("crud.reset_schema", err))?;

    let service = UserService::new(SqliteUserRepository::new(conn));
    let mut report = CrudReport {
        created: service
            .create_users(&seed_users())
            .map_err(|err| fatal("crud.bulk_create", err))?,
        ..CrudReport::default()
    };

    match service.list_users(false) {
        Ok(users) => report.listed_after_create = users,
        Err(err) => report.record("crud.list_all", err),
    }

    let saved = service
        .require_by_email("potato@example.com")
        .and_then(|mut potato| {
            potato.name = "Updated Potato".to_string();
            service.save_user(&potato)
        });
    if let Err(err) = saved {
        report.record("crud.save_potato", err);
    }

    let tomato = UserFilter::Email("tomato@example.com".to_string());
    if let Err(err) = service.update_existing(&tomato, &UserChanges::default().age(20)) {
        report.record("crud.update_tomato_age", err);
    }

    let carrot = UserFilter::Email("carrot@example.com".to_string());
    let carrot_changes = UserChanges::default().name("Fresh Carrot").age(15);
    if let Err(err) = service.update_existing(&carrot, &carrot_changes) {
        report.record("crud.update_carrot_fields", err);
    }

    let deleted = service
        .require_by_email("carrot@example.com")
        .and_then(|carrot| service.soft_delete_user(carrot.id));
    if let Err(err) = deleted {
        report.record("crud.soft_delete_carrot", err);
    }

    match service.list_users(false) {
        Ok(users) => report.final_users = users,
        Err(err) => report.record("crud.list_final", err),
    }

    info!(
        "event=walkthrough module=service status=ok name=crud final_users={} failures={}",
        report.final_users.len(),
        report.failures.len()
    );
    Ok(report)
}

/// What one savepoint example did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleOutcome {
    pub user: User,
    /// Message of the contained nested failure, if the nested work failed.
    pub nested_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SavepointReport {
    pub purged: usize,
    pub explicit: ExampleOutcome,
    pub implicit: ExampleOutcome,
    pub final_users: Vec<User>,
}

/// Purges all users, then runs the explicit and implicit examples.
pub fn run_savepoint_walkthrough(
    manager: &TransactionManager,
) -> WalkthroughResult<SavepointReport> {
    info!(
        "event=walkthrough module=service status=start name=savepoints policy={}",
        manager.policy().as_str()
    );
    let conn = manager
        .connection()
        .map_err(|err| fatal("savepoints.connect", err))?;
    let purged = UserService::new(SqliteUserRepository::new(conn))
        .purge_all()
        .map_err(|err| fatal("savepoints.purge", err))?;

    let explicit = explicit_savepoint_example(manager)?;
    let implicit = implicit_savepoint_example(manager)?;

    let final_users = UserService::new(SqliteUserRepository::new(conn))
        .list_users(false)
        .map_err(|err| fatal("savepoints.list_final", err))?;

    info!(
        "event=walkthrough module=service status=ok name=savepoints final_users={}",
        final_users.len()
    );
    Ok(SavepointReport {
        purged,
        explicit,
        implicit,
        final_users,
    })
}

/// Creates `ExplicitUser`, sets `sp_explicit`, fails a nested update and
/// rolls back to `sp_explicit` by hand before committing.
pub fn explicit_savepoint_example(
    manager: &TransactionManager,
) -> WalkthroughResult<ExampleOutcome> {
    run_example(
        manager,
        "explicit",
        NewUser::new("ExplicitUser", "explicit@example.com").with_balance(STARTING_BALANCE),
        SavepointMode::Explicit(EXPLICIT_SAVEPOINT.to_string()),
    )
}

/// Creates `ImplicitUser` and fails a nested update under an anonymous
/// savepoint owned by the runner, then commits.
pub fn implicit_savepoint_example(
    manager: &TransactionManager,
) -> WalkthroughResult<ExampleOutcome> {
    run_example(
        manager,
        "implicit",
        NewUser::new("ImplicitUser", "implicit@example.com").with_balance(STARTING_BALANCE),
        SavepointMode::Implicit,
    )
}

fn run_example(
    manager: &TransactionManager,
    label: &'static str,
    new_user: NewUser,
    mode: SavepointMode,
) -> WalkthroughResult<ExampleOutcome> {
    info!("event=savepoint_example module=service status=start example={label}");
    // An early return drops `tx`, which rolls it back.
    let mut tx = manager.begin().map_err(|err| fatal("example.begin", err))?;
    let conn = tx
        .connection()
        .map_err(|err| fatal("example.connection", err))?;

    let user = UserService::new(SqliteUserRepository::new(conn))
        .create_user(&new_user)
        .map_err(|err| fatal("example.create_user", err))?;

    if let SavepointMode::Explicit(name) = &mode {
        tx.savepoint(name)
            .map_err(|err| fatal("example.savepoint", err))?;
    }

    let outcome = tx
        .run_nested(&mode, |conn| {
            UserService::new(SqliteUserRepository::new(conn)).update_existing(
                &UserFilter::Name(MISSING_USER_NAME.to_string()),
                &UserChanges::default().balance(NESTED_BALANCE),
            )
        })
        .map_err(|err| fatal("example.nested", err))?;

    let nested_error = match outcome {
        NestedOutcome::Completed(_) => None,
        NestedOutcome::Failed { savepoint, error } => {
            warn!(
                "event=savepoint_example module=service status=error example={label} user={} savepoint={savepoint} error={error} action=rollback_to",
                user.email
            );
            tx.rollback_to(&savepoint)
                .map_err(|err| fatal("example.rollback_to", err))?;
            Some(error.to_string())
        }
        NestedOutcome::RolledBack(error) => {
            warn!(
                "event=savepoint_example module=service status=error example={label} user={} error={error} action=continue",
                user.email
            );
            Some(error.to_string())
        }
    };

    tx.commit().map_err(|err| fatal("example.commit", err))?;
    info!(
        "event=savepoint_example module=service status=ok example={label} user={} nested_failed={}",
        user.email,
        nested_error.is_some()
    );
    Ok(ExampleOutcome { user, nested_error })
}
