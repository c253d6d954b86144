//! Company repository for `SQLite` persistence.

use std::sync::Arc;

use crate::models::Company;
use crate::Result;

use super::db::Database;
use super::parse_timestamp;

/// Repository for company records.
#[derive(Clone)]
pub struct CompanyRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct CompanyRow {
    id: i64,
    name: String,
    website: Option<String>,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
}

impl CompanyRow {
    fn into_company(self) -> Result<Company> {
        Ok(Company {
            id: self.id,
            name: self.name,
            website: self.website,
            notes: self.notes,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

impl CompanyRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert the company, or update every column if the id already exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the statement fails.
    pub async fn upsert(&self, company: &Company) -> Result<()> {
        sqlx::query(
            "INSERT INTO company (id, name, website, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                website = excluded.website,
                notes = excluded.notes,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
        )
        .bind(company.id)
        .bind(&company.name)
        .bind(&company.website)
        .bind(&company.notes)
        .bind(company.created_at.to_rfc3339())
        .bind(company.updated_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Retrieve a company by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, id: i64) -> Result<Option<Company>> {
        let row: Option<CompanyRow> = sqlx::query_as(
            "SELECT id, name, website, notes, created_at, updated_at
             FROM company WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(CompanyRow::into_company).transpose()
    }

    /// List all companies ordered by name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<Company>> {
        let rows: Vec<CompanyRow> = sqlx::query_as(
            "SELECT id, name, website, notes, created_at, updated_at
             FROM company ORDER BY name ASC, id ASC",
        )
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(CompanyRow::into_company).collect()
    }

    /// Delete a company. Jobs referencing it are detached by the schema.
    ///
    /// Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM company WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
