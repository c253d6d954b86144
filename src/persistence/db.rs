//! `SQLite` connection setup and write-ahead-log maintenance.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::debug;

use crate::{AppError, Result};

use super::schema;

/// Alias for the shared `SQLite` pool.
pub type Database = SqlitePool;

/// Open (or create) the relational file at `path` and apply the schema.
///
/// The connection enables WAL journaling, a bounded busy timeout, and
/// foreign-key enforcement.
///
/// # Errors
///
/// Returns `AppError::Db` if the connection or schema application fails.
pub async fn connect(path: &Path, busy_timeout: Duration, max_connections: u32) -> Result<Database> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| AppError::Db(format!("failed to create db dir: {err}")))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    schema::bootstrap_schema(&pool).await?;
    Ok(pool)
}

/// Open an in-memory database with the schema applied.
///
/// The pool is pinned to a single connection that never expires, since
/// every `SQLite` memory connection is its own database.
///
/// # Errors
///
/// Returns `AppError::Db` if the connection or schema application fails.
pub async fn connect_memory() -> Result<Database> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    schema::bootstrap_schema(&pool).await?;
    Ok(pool)
}

/// Merge the write-ahead log back into the main database file and truncate it.
///
/// # Errors
///
/// Returns `AppError::Db` if the pragma fails, or `AppError::Sync` if the
/// checkpoint could not complete because another connection held the log.
pub async fn checkpoint(db: &Database) -> Result<()> {
    let (busy, log_frames, checkpointed): (i64, i64, i64) =
        sqlx::query_as("PRAGMA wal_checkpoint(TRUNCATE)")
            .fetch_one(db)
            .await?;
    if busy != 0 {
        return Err(AppError::Sync(format!(
            "wal checkpoint blocked ({checkpointed}/{log_frames} frames)"
        )));
    }
    debug!(log_frames, checkpointed, "wal checkpoint complete");
    Ok(())
}
