//! Relational persistence: connection setup, schema, and per-record repositories.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{AppError, Result};

pub mod company_repo;
pub mod db;
pub mod job_repo;
pub mod match_repo;
pub mod profile_repo;
pub mod schema;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;

use company_repo::CompanyRepo;
use db::Database;
use job_repo::JobRepo;
use match_repo::MatchRepo;
use profile_repo::ProfileRepo;

/// The full repository set for one tenant's relational file.
#[derive(Clone)]
pub struct Repositories {
    /// Shared pool backing every repository.
    pub db: Arc<Database>,
    /// Company records.
    pub companies: CompanyRepo,
    /// Job records.
    pub jobs: JobRepo,
    /// Tenant and profile records.
    pub profiles: ProfileRepo,
    /// Match results.
    pub matches: MatchRepo,
}

impl Repositories {
    /// Build every repository over one shared pool.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            companies: CompanyRepo::new(Arc::clone(&db)),
            jobs: JobRepo::new(Arc::clone(&db)),
            profiles: ProfileRepo::new(Arc::clone(&db)),
            matches: MatchRepo::new(Arc::clone(&db)),
            db,
        }
    }

    /// Highest record id across all tables, or `0` for an empty database.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn max_id(&self) -> Result<i64> {
        let max: i64 = sqlx::query_scalar(
            "SELECT MAX(
                (SELECT COALESCE(MAX(id), 0) FROM profile),
                (SELECT COALESCE(MAX(id), 0) FROM company),
                (SELECT COALESCE(MAX(id), 0) FROM job),
                (SELECT COALESCE(MAX(id), 0) FROM match_result)
            )",
        )
        .fetch_one(self.db.as_ref())
        .await?;
        Ok(max)
    }
}

/// Parse an RFC 3339 column value.
pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {column}: {e}")))
}

/// Parse a JSON string-array column value.
pub(crate) fn parse_string_list(column: &str, value: &str) -> Result<Vec<String>> {
    serde_json::from_str(value).map_err(|e| AppError::Db(format!("invalid {column}: {e}")))
}
