//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering all storage failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure, including an empty tenant id.
    Config(String),
    /// Failure while constructing a tenant's storage (open, migrate, restore).
    Init(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Embedded cache failure.
    Cache(String),
    /// Encoding or decoding of a cached payload failed.
    Codec(String),
    /// Requested entity does not exist in either tier.
    NotFound(String),
    /// Flushing cached state into the relational store failed.
    Sync(String),
    /// Remote backup provider failure.
    Backup(String),
    /// Operation attempted on a storage instance that has been closed.
    Closed(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Several independent failures collected while closing resources.
    Aggregate(Vec<AppError>),
}

impl AppError {
    /// Collapse a list of errors into a single result.
    ///
    /// # Errors
    ///
    /// Returns the only error unchanged, or `AppError::Aggregate` when
    /// there is more than one.
    pub fn collect(mut errors: Vec<AppError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Aggregate(errors)),
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Cache(msg) => write!(f, "cache: {msg}"),
            Self::Codec(msg) => write!(f, "codec: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Sync(msg) => write!(f, "sync: {msg}"),
            Self::Backup(msg) => write!(f, "backup: {msg}"),
            Self::Closed(msg) => write!(f, "closed: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Aggregate(errors) => {
                write!(f, "{} errors: ", errors.len())?;
                for (idx, err) in errors.iter().enumerate() {
                    if idx > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{err}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<redb::DatabaseError> for AppError {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Cache(err.to_string())
    }
}

impl From<redb::TransactionError> for AppError {
    fn from(err: redb::TransactionError) -> Self {
        Self::Cache(err.to_string())
    }
}

impl From<redb::TableError> for AppError {
    fn from(err: redb::TableError) -> Self {
        Self::Cache(err.to_string())
    }
}

impl From<redb::StorageError> for AppError {
    fn from(err: redb::StorageError) -> Self {
        Self::Cache(err.to_string())
    }
}

impl From<redb::CommitError> for AppError {
    fn from(err: redb::CommitError) -> Self {
        Self::Cache(err.to_string())
    }
}
