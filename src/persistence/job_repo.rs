//! Job repository for `SQLite` persistence.

use std::sync::Arc;

use crate::models::{Job, JobStatus};
use crate::{AppError, Result};

use super::db::Database;
use super::parse_timestamp;

/// Repository for job records.
#[derive(Clone)]
pub struct JobRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    company_id: Option<i64>,
    title: String,
    url: Option<String>,
    description: Option<String>,
    location: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| AppError::Db(format!("invalid job status: {}", self.status)))?;
        Ok(Job {
            id: self.id,
            company_id: self.company_id,
            title: self.title,
            url: self.url,
            description: self.description,
            location: self.location,
            status,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, company_id, title, url, description, location, status, created_at, updated_at FROM job";

impl JobRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert the job, or update every column if the id already exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the statement fails, including a foreign-key
    /// violation for an unknown `company_id`.
    pub async fn upsert(&self, job: &Job) -> Result<()> {
        sqlx::query(
            "INSERT INTO job (id, company_id, title, url, description, location, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                company_id = excluded.company_id,
                title = excluded.title,
                url = excluded.url,
                description = excluded.description,
                location = excluded.location,
                status = excluded.status,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
        )
        .bind(job.id)
        .bind(job.company_id)
        .bind(&job.title)
        .bind(&job.url)
        .bind(&job.description)
        .bind(&job.location)
        .bind(job.status.as_str())
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Retrieve a job by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, id: i64) -> Result<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(JobRow::into_job).transpose()
    }

    /// List jobs, optionally restricted to one company, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self, company_filter: Option<i64>) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = if let Some(company_id) = company_filter {
            sqlx::query_as(&format!(
                "{SELECT_COLUMNS} WHERE company_id = ?1 ORDER BY updated_at DESC, id DESC"
            ))
            .bind(company_id)
            .fetch_all(self.db.as_ref())
            .await?
        } else {
            sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY updated_at DESC, id DESC"))
                .fetch_all(self.db.as_ref())
                .await?
        };
        rows.into_iter().map(JobRow::into_job).collect()
    }

    /// Delete a job. Its match results are removed by the schema.
    ///
    /// Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM job WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
