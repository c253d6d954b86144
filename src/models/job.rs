//! Job posting model and application status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Record;

/// Where the user stands with a job posting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Bookmarked, no action taken yet.
    #[default]
    Saved,
    /// Application submitted.
    Applied,
    /// In the interview loop.
    Interviewing,
    /// Offer received.
    Offer,
    /// Rejected by either side.
    Rejected,
    /// No longer of interest.
    Archived,
}

impl JobStatus {
    /// Stable string form used by the relational schema.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Saved => "saved",
            Self::Applied => "applied",
            Self::Interviewing => "interviewing",
            Self::Offer => "offer",
            Self::Rejected => "rejected",
            Self::Archived => "archived",
        }
    }

    /// Parse the relational string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "saved" => Some(Self::Saved),
            "applied" => Some(Self::Applied),
            "interviewing" => Some(Self::Interviewing),
            "offer" => Some(Self::Offer),
            "rejected" => Some(Self::Rejected),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// A tracked job posting.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    /// Record identifier; `0` until first saved.
    pub id: i64,
    /// Owning company, if known.
    pub company_id: Option<i64>,
    /// Posting title.
    pub title: String,
    /// Link to the original posting.
    pub url: Option<String>,
    /// Posting body.
    pub description: Option<String>,
    /// Work location.
    pub location: Option<String>,
    /// Application status.
    pub status: JobStatus,
    /// Creation timestamp, stamped on first save.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp, stamped on every save.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Construct an unsaved job with the given title.
    #[must_use]
    pub fn new(title: impl Into<String>, company_id: Option<i64>) -> Self {
        Self {
            title: title.into(),
            company_id,
            ..Self::default()
        }
    }
}

impl Record for Job {
    const KIND: &'static str = "job";

    fn id(&self) -> i64 {
        self.id
    }
}
