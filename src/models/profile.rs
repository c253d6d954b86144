//! Tenant profile model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Record;

/// The single profile record owned by a tenant.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    /// Record identifier.
    pub id: i64,
    /// Tenant that owns this profile.
    pub tenant_id: String,
    /// Display name.
    pub full_name: Option<String>,
    /// Contact email.
    pub email: Option<String>,
    /// One-line professional headline.
    pub headline: Option<String>,
    /// Longer résumé summary.
    pub summary: Option<String>,
    /// Declared skills, in the user's order.
    pub skills: Vec<String>,
    /// Preferred work location.
    pub location: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Construct an empty profile for `tenant_id` with the given id.
    #[must_use]
    pub fn empty(id: i64, tenant_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            tenant_id: tenant_id.into(),
            created_at: now,
            updated_at: now,
            ..Self::default()
        }
    }
}

impl Record for Profile {
    const KIND: &'static str = "profile";

    fn id(&self) -> i64 {
        self.id
    }
}
