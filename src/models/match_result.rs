//! Profile-to-job match scoring result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Record;

/// Outcome of scoring the tenant's profile against one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MatchResult {
    /// Record identifier; `0` until first saved.
    pub id: i64,
    /// Job that was scored.
    pub job_id: i64,
    /// Fit score in `0.0..=100.0`.
    pub score: f64,
    /// Narrative explanation of the score.
    pub summary: Option<String>,
    /// Points in favour of the match.
    pub strengths: Vec<String>,
    /// Missing qualifications.
    pub gaps: Vec<String>,
    /// Creation timestamp, stamped on first save.
    pub created_at: DateTime<Utc>,
}

impl MatchResult {
    /// Construct an unsaved result for `job_id`.
    #[must_use]
    pub fn new(job_id: i64, score: f64) -> Self {
        Self {
            job_id,
            score,
            ..Self::default()
        }
    }
}

impl Record for MatchResult {
    const KIND: &'static str = "match result";

    fn id(&self) -> i64 {
        self.id
    }
}
