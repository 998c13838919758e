use std::panic::{catch_unwind, AssertUnwindSafe};
use txlab_core::db::open_db_in_memory;
use txlab_core::{
    DataSource, NestedFailurePolicy, NestedOutcome, NestedTransactionRunner, NewUser,
    SavepointMode, SqliteUserRepository, TransactionManager, TxError, TxState, UserChanges,
    UserFilter, UserListQuery, UserRepository, UserService, UserServiceError,
};

fn manager() -> TransactionManager {
    TransactionManager::new(open_db_in_memory().unwrap())
}

fn user_names(manager: &TransactionManager) -> Vec<String> {
    let conn = manager.connection().unwrap();
    SqliteUserRepository::new(conn)
        .list_users(&UserListQuery::default())
        .unwrap()
        .into_iter()
        .map(|user| user.name)
        .collect()
}

fn create(conn: &rusqlite::Connection, name: &str) {
    SqliteUserRepository::new(conn)
        .create_user(&NewUser::new(name, format!("{}@example.com", name.to_lowercase())))
        .unwrap();
}

fn bump_balance(conn: &rusqlite::Connection, name: &str) -> Result<usize, UserServiceError> {
    UserService::new(SqliteUserRepository::new(conn)).update_existing(
        &UserFilter::Name(name.to_string()),
        &UserChanges::default().balance(500),
    )
}

fn balance_of(manager: &TransactionManager, name: &str) -> i64 {
    let conn = manager.connection().unwrap();
    SqliteUserRepository::new(conn).find_by_name(name).unwrap()[0].balance
}

#[test]
fn commit_persists_outer_and_successful_inner_changes() {
    let manager = manager();
    let mut tx = manager.begin().unwrap();
    create(tx.connection().unwrap(), "A");

    let outcome = tx
        .run_nested(&SavepointMode::Implicit, |conn| bump_balance(conn, "A"))
        .unwrap();
    assert!(matches!(outcome, NestedOutcome::Completed(1)));
    assert!(tx.savepoints().is_empty());

    tx.commit().unwrap();
    assert_eq!(tx.state(), TxState::Committed);
    assert_eq!(user_names(&manager), vec!["A"]);
    assert_eq!(balance_of(&manager, "A"), 500);
}

#[test]
fn explicit_savepoint_rollback_keeps_outer_work() {
    let manager = manager();
    let mut tx = manager.begin().unwrap();
    create(tx.connection().unwrap(), "A");
    tx.savepoint("sp_explicit").unwrap();

    let outcome = tx
        .run_nested(&SavepointMode::Explicit("sp_explicit".to_string()), |conn| {
            bump_balance(conn, "B")
        })
        .unwrap();
    let savepoint = match outcome {
        NestedOutcome::Failed { savepoint, error } => {
            assert!(matches!(error, UserServiceError::NoRowsAffected(_)));
            savepoint
        }
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(savepoint, "sp_explicit");

    tx.rollback_to(&savepoint).unwrap();
    assert!(tx.is_active());
    tx.commit().unwrap();

    assert_eq!(user_names(&manager), vec!["A"]);
    assert_eq!(balance_of(&manager, "A"), 0);
}

#[test]
fn rollback_to_discards_only_work_after_savepoint() {
    let manager = manager();
    let mut tx = manager.begin().unwrap();
    let conn = tx.connection().unwrap();
    create(conn, "A");
    tx.savepoint("before_b").unwrap();
    create(conn, "B");
    tx.savepoint("before_c").unwrap();
    create(conn, "C");

    tx.rollback_to("before_b").unwrap();
    assert!(tx.savepoints().is_empty());
    create(conn, "D");
    tx.commit().unwrap();

    assert_eq!(user_names(&manager), vec!["A", "D"]);
}

#[test]
fn implicit_failure_is_rolled_back_transparently() {
    let manager = manager();
    let mut tx = manager.begin().unwrap();
    create(tx.connection().unwrap(), "A");

    let outcome = tx
        .run_nested(&SavepointMode::Implicit, |conn| {
            create(conn, "Inner");
            bump_balance(conn, "NonExistentUser")
        })
        .unwrap();
    assert!(matches!(outcome, NestedOutcome::RolledBack(_)));
    assert!(outcome.error().is_some());
    assert!(tx.is_active());
    assert!(tx.savepoints().is_empty());

    tx.commit().unwrap();
    assert_eq!(user_names(&manager), vec!["A"]);
}

#[test]
fn propagate_policy_rolls_back_whole_transaction() {
    let manager = manager().with_policy(NestedFailurePolicy::Propagate);
    let mut tx = manager.begin().unwrap();
    create(tx.connection().unwrap(), "A");

    let err = tx
        .run_nested(&SavepointMode::Implicit, |conn| {
            bump_balance(conn, "NonExistentUser")
        })
        .unwrap_err();
    assert!(matches!(err, TxError::Nested { .. }));
    assert_eq!(tx.state(), TxState::RolledBack);
    assert!(matches!(
        tx.commit(),
        Err(TxError::InvalidState {
            state: TxState::RolledBack,
            ..
        })
    ));

    assert!(user_names(&manager).is_empty());
}

#[test]
fn duplicate_savepoint_name_is_rejected() {
    let manager = manager();
    let mut tx = manager.begin().unwrap();
    tx.savepoint("sp_one").unwrap();

    let err = tx.savepoint("sp_one").unwrap_err();
    assert!(matches!(err, TxError::DuplicateName(name) if name == "sp_one"));

    tx.release("sp_one").unwrap();
    let err = tx.savepoint("SP_ONE").unwrap_err();
    assert!(matches!(err, TxError::DuplicateName(_)));
    assert!(tx.is_active());
}

#[test]
fn invalid_savepoint_name_is_rejected_before_sql() {
    let manager = manager();
    let mut tx = manager.begin().unwrap();

    let err = tx.savepoint("sp; DROP TABLE users").unwrap_err();
    assert!(matches!(err, TxError::InvalidName(_)));
    assert!(tx.savepoints().is_empty());
}

#[test]
fn keyword_savepoint_names_are_usable() {
    let manager = manager();
    let mut tx = manager.begin().unwrap();
    let conn = tx.connection().unwrap();
    create(conn, "A");

    tx.savepoint("select").unwrap();
    create(conn, "B");
    tx.rollback_to("select").unwrap();

    tx.savepoint("transaction").unwrap();
    create(conn, "C");
    tx.release("TRANSACTION").unwrap();
    assert!(tx.savepoints().is_empty());

    tx.commit().unwrap();
    assert_eq!(user_names(&manager), vec!["A", "C"]);
}

#[test]
fn second_rollback_to_same_savepoint_escalates_to_full_rollback() {
    let manager = manager();
    let mut tx = manager.begin().unwrap();
    let conn = tx.connection().unwrap();
    create(conn, "A");
    tx.savepoint("sp").unwrap();
    create(conn, "B");

    tx.rollback_to("sp").unwrap();
    let err = tx.rollback_to("sp").unwrap_err();
    assert!(matches!(err, TxError::Rollback { ref savepoint, .. } if savepoint == "sp"));
    assert_eq!(tx.state(), TxState::RolledBack);

    assert!(user_names(&manager).is_empty());
}

#[test]
fn rollback_to_released_savepoint_escalates() {
    let manager = manager();
    let mut tx = manager.begin().unwrap();
    create(tx.connection().unwrap(), "A");
    tx.savepoint("sp").unwrap();
    tx.release("sp").unwrap();

    let err = tx.rollback_to("sp").unwrap_err();
    assert!(matches!(err, TxError::Rollback { .. }));
    assert_eq!(tx.state(), TxState::RolledBack);
    assert!(user_names(&manager).is_empty());
}

#[test]
fn operations_on_finished_transaction_are_invalid_state() {
    let manager = manager();
    let mut tx = manager.begin().unwrap();
    tx.commit().unwrap();

    assert!(matches!(
        tx.savepoint("late"),
        Err(TxError::InvalidState {
            state: TxState::Committed,
            ..
        })
    ));
    assert!(matches!(tx.rollback(), Err(TxError::InvalidState { .. })));
    assert!(matches!(tx.connection(), Err(TxError::InvalidState { .. })));
    let nested = tx.run_nested(&SavepointMode::Implicit, |_| Ok::<_, String>(()));
    assert!(matches!(nested, Err(TxError::InvalidState { .. })));
}

#[test]
fn explicit_mode_requires_an_open_savepoint() {
    let manager = manager();
    let mut tx = manager.begin().unwrap();

    let err = tx
        .run_nested(&SavepointMode::Explicit("missing".to_string()), |_| {
            Ok::<_, String>(())
        })
        .unwrap_err();
    assert!(matches!(err, TxError::UnknownSavepoint(_)));
    assert!(tx.is_active());
}

#[test]
fn rollback_discards_everything_including_savepoints() {
    let manager = manager();
    let mut tx = manager.begin().unwrap();
    let conn = tx.connection().unwrap();
    create(conn, "A");
    tx.savepoint("sp").unwrap();
    create(conn, "B");

    tx.rollback().unwrap();
    assert_eq!(tx.state(), TxState::RolledBack);
    assert!(user_names(&manager).is_empty());
}

#[test]
fn dropping_active_transaction_rolls_back() {
    let manager = manager();
    {
        let tx = manager.begin().unwrap();
        create(tx.connection().unwrap(), "A");
    }
    assert!(user_names(&manager).is_empty());

    let mut tx = manager.begin().unwrap();
    tx.commit().unwrap();
}

#[test]
fn panic_inside_nested_work_rolls_back_outer_transaction() {
    let manager = manager();
    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut tx = manager.begin().unwrap();
        create(tx.connection().unwrap(), "A");
        let _ = tx.run_nested(&SavepointMode::Implicit, |conn| -> Result<(), String> {
            create(conn, "B");
            panic!("nested work blew up");
        });
    }));
    assert!(result.is_err());

    assert!(manager.connection().unwrap().is_autocommit());
    assert!(user_names(&manager).is_empty());
}

#[test]
fn begin_while_active_is_invalid_state() {
    let manager = manager();
    let _tx = manager.begin().unwrap();

    let err = manager.begin().err().unwrap();
    assert!(matches!(
        err,
        TxError::InvalidState {
            operation: "begin",
            ..
        }
    ));
}

#[test]
fn begin_after_close_is_connection_error() {
    let mut manager = manager();
    manager.close().unwrap();
    manager.close().unwrap();

    assert!(!manager.is_open());
    let err = manager.begin().err().unwrap();
    assert!(matches!(err, TxError::Connection { source: None, .. }));
}

#[test]
fn open_reports_connection_error_for_unusable_path() {
    let dir = tempfile::tempdir().unwrap();
    let source = DataSource::File(dir.path().join("missing").join("nested").join("db.sqlite"));

    let err = TransactionManager::open(&source).err().unwrap();
    assert!(matches!(err, TxError::Connection { source: Some(_), .. }));
}

#[test]
fn commit_rejected_by_deferred_constraint_is_commit_error() {
    let manager = manager();
    manager
        .connection()
        .unwrap()
        .execute_batch(
            "CREATE TABLE wallets (id INTEGER PRIMARY KEY);
             CREATE TABLE payments (
                id INTEGER PRIMARY KEY,
                wallet_id INTEGER REFERENCES wallets(id) DEFERRABLE INITIALLY DEFERRED
             );",
        )
        .unwrap();

    let mut tx = manager.begin().unwrap();
    let conn = tx.connection().unwrap();
    create(conn, "A");
    conn.execute("INSERT INTO payments (wallet_id) VALUES (42);", [])
        .unwrap();

    let err = tx.commit().unwrap_err();
    assert!(matches!(err, TxError::Commit(_)));
    assert_eq!(tx.state(), TxState::RolledBack);
    assert!(manager.connection().unwrap().is_autocommit());
    assert!(user_names(&manager).is_empty());
}
