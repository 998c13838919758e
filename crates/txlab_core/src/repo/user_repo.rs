//! User repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD, bulk insert and field-level update APIs over `users`.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Write paths validate input before SQL mutations.
//! - Default reads exclude soft-deleted rows (`deleted_at IS NOT NULL`).
//! - `update_where` reports affected rows; zero is not an error here.

use crate::db::{ensure_migrated, DbError};
use crate::model::user::{validate_age, validate_name, NewUser, User, UserId, UserValidationError};
use log::warn;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

const USER_COLUMNS: &str = "id, name, email, age, balance, created_at, updated_at, deleted_at";

const NOW_MS_SQL: &str = "CAST(unixepoch('now', 'subsec') * 1000 AS INTEGER)";

/// Rows per bulk `INSERT`; keeps bind variables well under SQLite's limit.
const INSERT_CHUNK_ROWS: usize = 500;
const BULK_SAVEPOINT: &str = "user_repo_bulk_insert";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for user persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(UserValidationError),
    Db(DbError),
    NotFound(UserId),
    /// A write hit the `email` uniqueness constraint.
    UniqueViolation(String),
    /// `update_where` was called without any field to change.
    EmptyUpdate,
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "user not found: {id}"),
            Self::UniqueViolation(message) => write!(f, "unique constraint violated: {message}"),
            Self::EmptyUpdate => write!(f, "update requires at least one changed field"),
            Self::InvalidData(message) => write!(f, "invalid persisted user data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_)
            | Self::UniqueViolation(_)
            | Self::EmptyUpdate
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<UserValidationError> for RepoError {
    fn from(value: UserValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        match &value {
            rusqlite::Error::SqliteFailure(err, message)
                if err.code == ErrorCode::ConstraintViolation
                    && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Self::UniqueViolation(message.clone().unwrap_or_else(|| err.to_string()))
            }
            _ => Self::Db(DbError::Sqlite(value)),
        }
    }
}

/// Query options for listing users.
#[derive(Debug, Clone, Default)]
pub struct UserListQuery {
    pub include_deleted: bool,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Row selector for field-level updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserFilter {
    Email(String),
    Name(String),
}

impl UserFilter {
    fn column(&self) -> &'static str {
        match self {
            Self::Email(_) => "email",
            Self::Name(_) => "name",
        }
    }

    fn value(&self) -> &str {
        match self {
            Self::Email(value) | Self::Name(value) => value.as_str(),
        }
    }
}

impl Display for UserFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.column(), self.value())
    }
}

/// Partial update: only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserChanges {
    pub name: Option<String>,
    pub age: Option<i64>,
    pub balance: Option<i64>,
}

impl UserChanges {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn age(mut self, age: i64) -> Self {
        self.age = Some(age);
        self
    }

    pub fn balance(mut self, balance: i64) -> Self {
        self.balance = Some(balance);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.age.is_none() && self.balance.is_none()
    }

    fn validate(&self) -> Result<(), UserValidationError> {
        if let Some(name) = self.name.as_deref() {
            validate_name(name)?;
        }
        if let Some(age) = self.age {
            validate_age(age)?;
        }
        Ok(())
    }
}

/// Repository interface for user CRUD operations.
pub trait UserRepository {
    fn create_user(&self, user: &NewUser) -> RepoResult<User>;
    /// Inserts every user or none of them; returned rows are in id order.
    fn create_users(&self, users: &[NewUser]) -> RepoResult<Vec<User>>;
    fn get_user(&self, id: UserId, include_deleted: bool) -> RepoResult<Option<User>>;
    fn find_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    fn find_by_name(&self, name: &str) -> RepoResult<Vec<User>>;
    fn list_users(&self, query: &UserListQuery) -> RepoResult<Vec<User>>;
    fn save_user(&self, user: &User) -> RepoResult<()>;
    fn update_where(&self, filter: &UserFilter, changes: &UserChanges) -> RepoResult<usize>;
    fn soft_delete_user(&self, id: UserId) -> RepoResult<()>;
    fn purge_all(&self) -> RepoResult<usize>;
}

/// SQLite-backed user repository.
///
/// Works on a plain connection or inside an open transaction: it never
/// begins or ends transactions itself. Bulk inserts larger than one chunk
/// run under a private savepoint that is released before returning.
pub struct SqliteUserRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteUserRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Like `new`, but rejects connections whose schema is not migrated.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_migrated(conn)?;
        Ok(Self::new(conn))
    }

    /// One multi-row `INSERT ... RETURNING`, ordered by id.
    fn insert_chunk(&self, users: &[NewUser]) -> RepoResult<Vec<User>> {
        let placeholders = vec!["(?, ?, ?, ?)"; users.len()].join(", ");
        let mut bind_values: Vec<Value> = Vec::with_capacity(users.len() * 4);
        for user in users {
            bind_values.push(Value::Text(user.name.clone()));
            bind_values.push(Value::Text(user.email.clone()));
            bind_values.push(Value::Integer(user.age));
            bind_values.push(Value::Integer(user.balance));
        }

        let mut stmt = self.conn.prepare(&format!(
            "INSERT INTO users (name, email, age, balance)
             VALUES {placeholders}
             RETURNING {USER_COLUMNS};"
        ))?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut created = Vec::with_capacity(users.len());
        while let Some(row) = rows.next()? {
            created.push(parse_user_row(row)?);
        }
        created.sort_by_key(|user| user.id);
        Ok(created)
    }
}

impl UserRepository for SqliteUserRepository<'_> {
    fn create_user(&self, user: &NewUser) -> RepoResult<User> {
        user.validate()?;

        let mut stmt = self.conn.prepare(&format!(
            "INSERT INTO users (name, email, age, balance)
             VALUES (?1, ?2, ?3, ?4)
             RETURNING {USER_COLUMNS};"
        ))?;
        let mut rows = stmt.query(params![
            user.name.as_str(),
            user.email.as_str(),
            user.age,
            user.balance,
        ])?;
        match rows.next()? {
            Some(row) => parse_user_row(row),
            None => Err(RepoError::InvalidData(
                "insert returned no row".to_string(),
            )),
        }
    }

    fn create_users(&self, users: &[NewUser]) -> RepoResult<Vec<User>> {
        if users.is_empty() {
            return Ok(Vec::new());
        }
        for user in users {
            user.validate()?;
        }

        if users.len() <= INSERT_CHUNK_ROWS {
            return self.insert_chunk(users);
        }

        self.conn
            .execute_batch(&format!("SAVEPOINT {BULK_SAVEPOINT};"))?;
        let mut created = Vec::with_capacity(users.len());
        for chunk in users.chunks(INSERT_CHUNK_ROWS) {
            match self.insert_chunk(chunk) {
                Ok(rows) => created.extend(rows),
                Err(err) => {
                    if let Err(undo_err) = self.conn.execute_batch(&format!(
                        "ROLLBACK TO SAVEPOINT {BULK_SAVEPOINT}; RELEASE SAVEPOINT {BULK_SAVEPOINT};"
                    )) {
                        warn!(
                            "event=user_bulk_insert module=repo status=error action=undo error={undo_err}"
                        );
                    }
                    return Err(err);
                }
            }
        }
        self.conn
            .execute_batch(&format!("RELEASE SAVEPOINT {BULK_SAVEPOINT};"))?;
        Ok(created)
    }

    fn get_user(&self, id: UserId, include_deleted: bool) -> RepoResult<Option<User>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {USER_COLUMNS}
             FROM users
             WHERE id = ?1
               AND (?2 = 1 OR deleted_at IS NULL);"
        ))?;
        let mut rows = stmt.query(params![id, bool_to_int(include_deleted)])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_user_row(row)?)),
            None => Ok(None),
        }
    }

    fn find_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let found = self
            .conn
            .query_row(
                &format!(
                    "SELECT {USER_COLUMNS}
                     FROM users
                     WHERE email = ?1 AND deleted_at IS NULL
                     ORDER BY id ASC
                     LIMIT 1;"
                ),
                [email],
                |row| Ok(parse_user_row(row)),
            )
            .optional()?;
        found.transpose()
    }

    fn find_by_name(&self, name: &str) -> RepoResult<Vec<User>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {USER_COLUMNS}
             FROM users
             WHERE name = ?1 AND deleted_at IS NULL
             ORDER BY id ASC;"
        ))?;
        let mut rows = stmt.query([name])?;
        let mut users = Vec::new();
        while let Some(row) = rows.next()? {
            users.push(parse_user_row(row)?);
        }
        Ok(users)
    }

    fn list_users(&self, query: &UserListQuery) -> RepoResult<Vec<User>> {
        let mut sql = format!("SELECT {USER_COLUMNS} FROM users WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.include_deleted {
            sql.push_str(" AND deleted_at IS NULL");
        }

        sql.push_str(" ORDER BY id ASC");

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut users = Vec::new();
        while let Some(row) = rows.next()? {
            users.push(parse_user_row(row)?);
        }
        Ok(users)
    }

    fn save_user(&self, user: &User) -> RepoResult<()> {
        user.validate()?;

        let changed = self.conn.execute(
            &format!(
                "UPDATE users
                 SET
                    name = ?1,
                    email = ?2,
                    age = ?3,
                    balance = ?4,
                    updated_at = {NOW_MS_SQL}
                 WHERE id = ?5
                   AND deleted_at IS NULL;"
            ),
            params![
                user.name.as_str(),
                user.email.as_str(),
                user.age,
                user.balance,
                user.id,
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(user.id));
        }
        Ok(())
    }

    fn update_where(&self, filter: &UserFilter, changes: &UserChanges) -> RepoResult<usize> {
        if changes.is_empty() {
            return Err(RepoError::EmptyUpdate);
        }
        changes.validate()?;

        let mut assignments = Vec::new();
        let mut bind_values: Vec<Value> = Vec::new();
        if let Some(name) = changes.name.as_ref() {
            assignments.push("name = ?");
            bind_values.push(Value::Text(name.clone()));
        }
        if let Some(age) = changes.age {
            assignments.push("age = ?");
            bind_values.push(Value::Integer(age));
        }
        if let Some(balance) = changes.balance {
            assignments.push("balance = ?");
            bind_values.push(Value::Integer(balance));
        }
        bind_values.push(Value::Text(filter.value().to_string()));

        let sql = format!(
            "UPDATE users
             SET {}, updated_at = {NOW_MS_SQL}
             WHERE {} = ?
               AND deleted_at IS NULL;",
            assignments.join(", "),
            filter.column()
        );
        let changed = self.conn.execute(&sql, params_from_iter(bind_values))?;
        Ok(changed)
    }

    fn soft_delete_user(&self, id: UserId) -> RepoResult<()> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE users
                 SET
                    deleted_at = COALESCE(deleted_at, {NOW_MS_SQL}),
                    updated_at = {NOW_MS_SQL}
                 WHERE id = ?1;"
            ),
            [id],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }

    fn purge_all(&self) -> RepoResult<usize> {
        let removed = self.conn.execute("DELETE FROM users;", [])?;
        Ok(removed)
    }
}

fn parse_user_row(row: &Row<'_>) -> RepoResult<User> {
    let user = User {
        id: row.get("id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        age: row.get("age")?,
        balance: row.get("balance")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    };
    user.validate().map_err(|err| {
        RepoError::InvalidData(format!("row id={} failed validation: {err}", user.id))
    })?;
    Ok(user)
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
