//! Match result repository for `SQLite` persistence.

use std::sync::Arc;

use crate::models::MatchResult;
use crate::Result;

use super::db::Database;
use super::{parse_string_list, parse_timestamp};

/// Repository for match result records.
#[derive(Clone)]
pub struct MatchRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct MatchRow {
    id: i64,
    job_id: i64,
    score: f64,
    summary: Option<String>,
    strengths: String,
    gaps: String,
    created_at: String,
}

impl MatchRow {
    fn into_result(self) -> Result<MatchResult> {
        Ok(MatchResult {
            id: self.id,
            job_id: self.job_id,
            score: self.score,
            summary: self.summary,
            strengths: parse_string_list("strengths", &self.strengths)?,
            gaps: parse_string_list("gaps", &self.gaps)?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
        })
    }
}

impl MatchRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert the result, or update every column if the id already exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the statement fails, including a foreign-key
    /// violation for an unknown `job_id`.
    pub async fn upsert(&self, result: &MatchResult) -> Result<()> {
        sqlx::query(
            "INSERT INTO match_result (id, job_id, score, summary, strengths, gaps, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                job_id = excluded.job_id,
                score = excluded.score,
                summary = excluded.summary,
                strengths = excluded.strengths,
                gaps = excluded.gaps,
                created_at = excluded.created_at",
        )
        .bind(result.id)
        .bind(result.job_id)
        .bind(result.score)
        .bind(&result.summary)
        .bind(serde_json::to_string(&result.strengths)?)
        .bind(serde_json::to_string(&result.gaps)?)
        .bind(result.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Retrieve a match result by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, id: i64) -> Result<Option<MatchResult>> {
        let row: Option<MatchRow> = sqlx::query_as(
            "SELECT id, job_id, score, summary, strengths, gaps, created_at
             FROM match_result WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(MatchRow::into_result).transpose()
    }

    /// List the most recent results, newest first, capped at `limit`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<MatchResult>> {
        let rows: Vec<MatchRow> = sqlx::query_as(
            "SELECT id, job_id, score, summary, strengths, gaps, created_at
             FROM match_result ORDER BY created_at DESC, id DESC LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(MatchRow::into_result).collect()
    }

    /// List every stored result, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_all(&self) -> Result<Vec<MatchResult>> {
        let rows: Vec<MatchRow> = sqlx::query_as(
            "SELECT id, job_id, score, summary, strengths, gaps, created_at
             FROM match_result ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(MatchRow::into_result).collect()
    }

    /// Delete a match result.
    ///
    /// Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM match_result WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
