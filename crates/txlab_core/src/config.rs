//! Startup configuration for txlab.
//!
//! # Responsibility
//! - Parse the single data-source locator into a typed `DataSource`.
//! - Carry the nested-failure policy and log settings chosen at startup.
//!
//! # Invariants
//! - `:memory:` (or an empty locator) always selects an in-memory database.
//! - Config values are plain data; nothing here touches the filesystem.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Locator string that selects an in-memory database.
pub const MEMORY_LOCATOR: &str = ":memory:";

/// Default file used when no locator is supplied.
pub const DEFAULT_DB_FILE: &str = "test.db";

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    /// Private in-memory database, discarded when the connection closes.
    Memory,
    /// SQLite database file on disk.
    File(PathBuf),
}

impl DataSource {
    /// Parses a locator. Never fails: anything that is not the memory
    /// marker is treated as a file path.
    pub fn from_locator(locator: &str) -> Self {
        let trimmed = locator.trim();
        if trimmed.is_empty() || trimmed == MEMORY_LOCATOR {
            Self::Memory
        } else {
            Self::File(PathBuf::from(trimmed))
        }
    }

    /// Short label used in log lines (`memory` or `file`).
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File(_) => "file",
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Memory => None,
            Self::File(path) => Some(path.as_path()),
        }
    }
}

impl Default for DataSource {
    fn default() -> Self {
        Self::File(PathBuf::from(DEFAULT_DB_FILE))
    }
}

impl Display for DataSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "{MEMORY_LOCATOR}"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// What happens to the outer transaction after a nested unit of work failed
/// and was rolled back to its savepoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NestedFailurePolicy {
    /// Keep the outer transaction active; the caller may still commit.
    #[default]
    Contain,
    /// Roll back the whole outer transaction and return the failure.
    Propagate,
}

impl NestedFailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contain => "contain",
            Self::Propagate => "propagate",
        }
    }
}

impl FromStr for NestedFailurePolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "contain" => Ok(Self::Contain),
            "propagate" => Ok(Self::Propagate),
            other => Err(ConfigError::InvalidValue {
                key: "nested_failure",
                value: other.to_string(),
                expected: "contain|propagate",
            }),
        }
    }
}

/// Logging settings resolved at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// One of `trace|debug|info|warn|error`.
    pub level: String,
    /// Absolute directory for rolling log files. `None` logs to stderr.
    pub log_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: crate::logging::default_log_level().to_string(),
            log_dir: None,
        }
    }
}

/// Configuration error for startup values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue {
                key,
                value,
                expected,
            } => write!(f, "invalid {key} `{value}`; expected {expected}"),
        }
    }
}

impl Error for ConfigError {}
