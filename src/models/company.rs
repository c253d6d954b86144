//! Company model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Record;

/// An employer the user is tracking openings at.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Company {
    /// Record identifier; `0` until first saved.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Company website.
    pub website: Option<String>,
    /// Free-form research notes.
    pub notes: Option<String>,
    /// Creation timestamp, stamped on first save.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp, stamped on every save.
    pub updated_at: DateTime<Utc>,
}

impl Company {
    /// Construct an unsaved company with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Record for Company {
    const KIND: &'static str = "company";

    fn id(&self) -> i64 {
        self.id
    }
}
