use rusqlite::Connection;
use txlab_core::db::migrations::latest_version;
use txlab_core::db::{ensure_migrated, open_db, open_db_at, open_db_in_memory, reset_schema, DbError};
use txlab_core::{DataSource, NewUser, SqliteUserRepository, UserRepository};

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "users");
    ensure_migrated(&conn).unwrap();
}

#[test]
fn users_table_has_expected_columns() {
    let conn = open_db_in_memory().unwrap();

    let mut stmt = conn.prepare("PRAGMA table_info(users);").unwrap();
    let mut rows = stmt.query([]).unwrap();
    let mut columns = Vec::new();
    while let Some(row) = rows.next().unwrap() {
        let column_name: String = row.get(1).unwrap();
        columns.push(column_name);
    }
    for expected in [
        "id",
        "name",
        "email",
        "age",
        "balance",
        "created_at",
        "updated_at",
        "deleted_at",
    ] {
        assert!(
            columns.contains(&expected.to_string()),
            "missing column {expected}"
        );
    }
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("txlab.db");

    let conn_first = open_db(&path).unwrap();
    SqliteUserRepository::new(&conn_first)
        .create_user(&NewUser::new("Potato", "potato@example.com"))
        .unwrap();
    drop(conn_first);

    let conn_second = open_db_at(&DataSource::File(path)).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    let found = SqliteUserRepository::new(&conn_second)
        .find_by_email("potato@example.com")
        .unwrap();
    assert!(found.is_some());
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn reset_schema_drops_rows_and_restores_latest_version() {
    let mut conn = open_db_in_memory().unwrap();
    SqliteUserRepository::new(&conn)
        .create_user(&NewUser::new("Carrot", "carrot@example.com"))
        .unwrap();

    reset_schema(&mut conn).unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM users;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn repository_rejects_unmigrated_connection() {
    let conn = Connection::open_in_memory().unwrap();

    let err = SqliteUserRepository::try_new(&conn).err().unwrap();
    assert!(err.to_string().contains("schema version"));
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
