use txlab_core::db::{open_db, open_db_in_memory};
use txlab_core::service::walkthrough::{
    explicit_savepoint_example, implicit_savepoint_example, MISSING_USER_NAME,
};
use txlab_core::{
    run_crud_walkthrough, run_savepoint_walkthrough, NestedFailurePolicy, NewUser,
    SqliteUserRepository, TransactionManager, TxError, UserListQuery, UserRepository,
};

#[test]
fn crud_walkthrough_reaches_expected_final_state() {
    let mut conn = open_db_in_memory().unwrap();
    SqliteUserRepository::new(&conn)
        .create_user(&NewUser::new("Leftover", "leftover@example.com"))
        .unwrap();

    let report = run_crud_walkthrough(&mut conn).unwrap();

    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(report.created.len(), 3);
    assert_eq!(report.listed_after_create.len(), 3);

    let names: Vec<&str> = report
        .final_users
        .iter()
        .map(|user| user.name.as_str())
        .collect();
    assert_eq!(names, vec!["Updated Potato", "Tomato"]);
    assert_eq!(report.final_users[1].age, 20);

    let all = SqliteUserRepository::new(&conn)
        .list_users(&UserListQuery {
            include_deleted: true,
            ..UserListQuery::default()
        })
        .unwrap();
    let carrot = all
        .iter()
        .find(|user| user.email == "carrot@example.com")
        .unwrap();
    assert_eq!(carrot.name, "Fresh Carrot");
    assert_eq!(carrot.age, 15);
    assert!(carrot.deleted_at.is_some());
}

#[test]
fn savepoint_walkthrough_keeps_both_users_and_drops_nested_updates() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(dir.path().join("test.db")).unwrap();
    SqliteUserRepository::new(&conn)
        .create_user(&NewUser::new("Stale", "stale@example.com"))
        .unwrap();
    let manager = TransactionManager::new(conn);

    let report = run_savepoint_walkthrough(&manager).unwrap();

    assert_eq!(report.purged, 1);
    assert!(report
        .explicit
        .nested_error
        .as_deref()
        .unwrap()
        .contains(MISSING_USER_NAME));
    assert!(report.implicit.nested_error.is_some());

    let summary: Vec<(&str, i64)> = report
        .final_users
        .iter()
        .map(|user| (user.name.as_str(), user.balance))
        .collect();
    assert_eq!(summary, vec![("ExplicitUser", 100), ("ImplicitUser", 100)]);
}

#[test]
fn examples_can_run_individually() {
    let manager = TransactionManager::new(open_db_in_memory().unwrap());

    let explicit = explicit_savepoint_example(&manager).unwrap();
    assert_eq!(explicit.user.email, "explicit@example.com");

    let implicit = implicit_savepoint_example(&manager).unwrap();
    assert_eq!(implicit.user.email, "implicit@example.com");
}

#[test]
fn rerunning_example_without_purge_fails_on_unique_email() {
    let manager = TransactionManager::new(open_db_in_memory().unwrap());
    explicit_savepoint_example(&manager).unwrap();

    let err = explicit_savepoint_example(&manager).unwrap_err();
    assert_eq!(err.step, "example.create_user");
    assert!(manager.connection().unwrap().is_autocommit());
}

#[test]
fn propagate_policy_aborts_implicit_example() {
    let manager = TransactionManager::new(open_db_in_memory().unwrap())
        .with_policy(NestedFailurePolicy::Propagate);

    let err = run_savepoint_walkthrough(&manager).unwrap_err();
    assert_eq!(err.step, "example.nested");
    assert!(matches!(
        err.failure,
        txlab_core::service::walkthrough::WalkthroughFailure::Tx(TxError::Nested { .. })
    ));

    let remaining: Vec<String> = SqliteUserRepository::new(manager.connection().unwrap())
        .list_users(&UserListQuery::default())
        .unwrap()
        .into_iter()
        .map(|user| user.name)
        .collect();
    assert_eq!(remaining, vec!["ExplicitUser"]);
}
