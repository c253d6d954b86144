//! Tenant and profile repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqliteExecutor;

use crate::models::Profile;
use crate::Result;

use super::db::Database;
use super::{parse_string_list, parse_timestamp};

/// Repository for the tenant row and its profile.
#[derive(Clone)]
pub struct ProfileRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: i64,
    tenant_id: String,
    full_name: Option<String>,
    email: Option<String>,
    headline: Option<String>,
    summary: Option<String>,
    skills: String,
    location: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ProfileRow {
    fn into_profile(self) -> Result<Profile> {
        Ok(Profile {
            id: self.id,
            tenant_id: self.tenant_id,
            full_name: self.full_name,
            email: self.email,
            headline: self.headline,
            summary: self.summary,
            skills: parse_string_list("skills", &self.skills)?,
            location: self.location,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

impl ProfileRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert the tenant row if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn ensure_tenant(&self, tenant: &str) -> Result<()> {
        ensure_tenant_with(self.db.as_ref(), tenant).await
    }

    /// Fetch the profile owned by `tenant`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, tenant: &str) -> Result<Option<Profile>> {
        let row: Option<ProfileRow> = sqlx::query_as(
            "SELECT id, tenant_id, full_name, email, headline, summary, skills, location, created_at, updated_at
             FROM profile WHERE tenant_id = ?1",
        )
        .bind(tenant)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(ProfileRow::into_profile).transpose()
    }

    /// Insert or update the profile.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the statement fails.
    pub async fn upsert(&self, profile: &Profile) -> Result<()> {
        upsert_with(self.db.as_ref(), profile).await
    }
}

/// Insert the tenant row on any executor (pool, connection, or transaction).
///
/// # Errors
///
/// Returns `AppError::Db` if the insert fails.
pub async fn ensure_tenant_with<'e, E>(executor: E, tenant: &str) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query("INSERT OR IGNORE INTO tenant (id, created_at) VALUES (?1, ?2)")
        .bind(tenant)
        .bind(Utc::now().to_rfc3339())
        .execute(executor)
        .await?;
    Ok(())
}

/// Upsert a profile on any executor (pool, connection, or transaction).
///
/// The conflict target is the tenant, so a tenant never holds two profiles.
///
/// # Errors
///
/// Returns `AppError::Db` if the statement fails.
pub async fn upsert_with<'e, E>(executor: E, profile: &Profile) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO profile (id, tenant_id, full_name, email, headline, summary, skills, location, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(tenant_id) DO UPDATE SET
            full_name = excluded.full_name,
            email = excluded.email,
            headline = excluded.headline,
            summary = excluded.summary,
            skills = excluded.skills,
            location = excluded.location,
            updated_at = excluded.updated_at",
    )
    .bind(profile.id)
    .bind(&profile.tenant_id)
    .bind(&profile.full_name)
    .bind(&profile.email)
    .bind(&profile.headline)
    .bind(&profile.summary)
    .bind(serde_json::to_string(&profile.skills)?)
    .bind(&profile.location)
    .bind(profile.created_at.to_rfc3339())
    .bind(profile.updated_at.to_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}
