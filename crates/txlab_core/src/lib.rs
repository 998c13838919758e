//! Core library for txlab: a SQLite user store and a nested-transaction
//! manager with savepoint rollback.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod txn;

pub use config::{ConfigError, DataSource, LogConfig, NestedFailurePolicy};
pub use logging::{default_log_level, init_logging, logging_status, LogTarget};
pub use model::user::{NewUser, User, UserId, UserValidationError};
pub use repo::user_repo::{
    RepoError, RepoResult, SqliteUserRepository, UserChanges, UserFilter, UserListQuery,
    UserRepository,
};
pub use service::user_service::{ServiceResult, UserService, UserServiceError};
pub use service::walkthrough::{
    run_crud_walkthrough, run_savepoint_walkthrough, CrudReport, SavepointReport,
    WalkthroughError,
};
pub use txn::{
    NestedOutcome, NestedTransactionRunner, SavepointMode, Transaction, TransactionManager,
    TxError, TxResult, TxState,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
