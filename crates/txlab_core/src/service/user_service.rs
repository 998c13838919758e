//! User use-case service.
//!
//! # Responsibility
//! - Provide CRUD entry points over any `UserRepository`.
//! - Turn "nothing matched" into an error where a caller requires a match.
//!
//! # Invariants
//! - Service APIs never bypass repository validation.
//! - The service never opens transactions; it runs on whatever connection
//!   scope its repository was built from.

use crate::model::user::{NewUser, User, UserId};
use crate::repo::user_repo::{RepoError, UserChanges, UserFilter, UserListQuery, UserRepository};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ServiceResult<T> = Result<T, UserServiceError>;

#[derive(Debug)]
pub enum UserServiceError {
    Repo(RepoError),
    /// No active user has this email.
    UserNotFound(String),
    /// A required update matched zero rows.
    NoRowsAffected(UserFilter),
}

impl Display for UserServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::UserNotFound(email) => write!(f, "no active user with email `{email}`"),
            Self::NoRowsAffected(filter) => {
                write!(f, "update matched no rows for {filter}")
            }
        }
    }
}

impl Error for UserServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::UserNotFound(_) | Self::NoRowsAffected(_) => None,
        }
    }
}

impl From<RepoError> for UserServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Use-case service wrapper for user CRUD operations.
pub struct UserService<R: UserRepository> {
    repo: R,
}

impl<R: UserRepository> UserService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn create_user(&self, user: &NewUser) -> ServiceResult<User> {
        Ok(self.repo.create_user(user)?)
    }

    /// Inserts all users or none.
    pub fn create_users(&self, users: &[NewUser]) -> ServiceResult<Vec<User>> {
        Ok(self.repo.create_users(users)?)
    }

    pub fn get_user(&self, id: UserId) -> ServiceResult<Option<User>> {
        Ok(self.repo.get_user(id, false)?)
    }

    /// Lists active users ordered by id; `include_deleted` adds tombstones.
    pub fn list_users(&self, include_deleted: bool) -> ServiceResult<Vec<User>> {
        let query = UserListQuery {
            include_deleted,
            ..UserListQuery::default()
        };
        Ok(self.repo.list_users(&query)?)
    }

    pub fn find_by_email(&self, email: &str) -> ServiceResult<Option<User>> {
        Ok(self.repo.find_by_email(email)?)
    }

    /// Like `find_by_email`, but a missing user is an error.
    pub fn require_by_email(&self, email: &str) -> ServiceResult<User> {
        self.repo
            .find_by_email(email)?
            .ok_or_else(|| UserServiceError::UserNotFound(email.to_string()))
    }

    pub fn find_by_name(&self, name: &str) -> ServiceResult<Vec<User>> {
        Ok(self.repo.find_by_name(name)?)
    }

    /// Writes every field of a previously loaded user.
    pub fn save_user(&self, user: &User) -> ServiceResult<()> {
        Ok(self.repo.save_user(user)?)
    }

    /// Updates matching rows and returns how many changed. Zero is fine.
    pub fn update_where(
        &self,
        filter: &UserFilter,
        changes: &UserChanges,
    ) -> ServiceResult<usize> {
        Ok(self.repo.update_where(filter, changes)?)
    }

    /// Updates matching rows; zero affected rows is `NoRowsAffected`.
    pub fn update_existing(
        &self,
        filter: &UserFilter,
        changes: &UserChanges,
    ) -> ServiceResult<usize> {
        let changed = self.repo.update_where(filter, changes)?;
        if changed == 0 {
            return Err(UserServiceError::NoRowsAffected(filter.clone()));
        }
        Ok(changed)
    }

    pub fn soft_delete_user(&self, id: UserId) -> ServiceResult<()> {
        Ok(self.repo.soft_delete_user(id)?)
    }

    /// Hard-deletes every user, soft-deleted rows included.
    pub fn purge_all(&self) -> ServiceResult<usize> {
        Ok(self.repo.purge_all()?)
    }
}
