//! `SQLite` schema bootstrap and version migration.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS`, so they are safe to
//! re-run on every open. The schema version is tracked in
//! `PRAGMA user_version`.

use sqlx::SqlitePool;
use tracing::info;

use crate::{AppError, Result};

/// Schema version written by this build.
pub const SCHEMA_VERSION: i64 = 1;

/// Apply all table definitions to the connected `SQLite` database.
///
/// Refuses to open a database written by a newer schema version.
///
/// # Errors
///
/// Returns `AppError::Db` if the version is unsupported or any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let current: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    if current > SCHEMA_VERSION {
        return Err(AppError::Db(format!(
            "database schema version {current} is newer than supported version {SCHEMA_VERSION}"
        )));
    }

    let ddl = r"
CREATE TABLE IF NOT EXISTS tenant (
    id              TEXT PRIMARY KEY NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS profile (
    id              INTEGER PRIMARY KEY NOT NULL,
    tenant_id       TEXT NOT NULL UNIQUE REFERENCES tenant(id) ON DELETE CASCADE,
    full_name       TEXT,
    email           TEXT,
    headline        TEXT,
    summary         TEXT,
    skills          TEXT NOT NULL DEFAULT '[]',
    location        TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS company (
    id              INTEGER PRIMARY KEY NOT NULL,
    name            TEXT NOT NULL,
    website         TEXT,
    notes           TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS job (
    id              INTEGER PRIMARY KEY NOT NULL,
    company_id      INTEGER REFERENCES company(id) ON DELETE SET NULL,
    title           TEXT NOT NULL,
    url             TEXT,
    description     TEXT,
    location        TEXT,
    status          TEXT NOT NULL CHECK(status IN ('saved','applied','interviewing','offer','rejected','archived')),
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS match_result (
    id              INTEGER PRIMARY KEY NOT NULL,
    job_id          INTEGER NOT NULL REFERENCES job(id) ON DELETE CASCADE,
    score           REAL NOT NULL,
    summary         TEXT,
    strengths       TEXT NOT NULL DEFAULT '[]',
    gaps            TEXT NOT NULL DEFAULT '[]',
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_job_company ON job(company_id);
CREATE INDEX IF NOT EXISTS idx_match_job ON match_result(job_id);
CREATE INDEX IF NOT EXISTS idx_match_created ON match_result(created_at);
";

    sqlx::raw_sql(ddl).execute(pool).await?;

    if current < SCHEMA_VERSION {
        // PRAGMA arguments cannot be bound; the value is a compile-time constant.
        sqlx::raw_sql(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))
            .execute(pool)
            .await?;
        info!(from = current, to = SCHEMA_VERSION, "schema migrated");
    }
    Ok(())
}
