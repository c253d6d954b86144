//! Domain model module declarations.
//!
//! Records are owned by the business layer; the storage engine treats them
//! as payloads keyed by a numeric id. An id of `0` marks a record that has
//! not been persisted yet.

use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod company;
pub mod job;
pub mod match_result;
pub mod profile;

pub use company::Company;
pub use job::{Job, JobStatus};
pub use match_result::MatchResult;
pub use profile::Profile;

/// A domain record that can be stored in both tiers.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Human-readable record kind used in error messages and logs.
    const KIND: &'static str;

    /// Numeric identity of the record (`0` when unassigned).
    fn id(&self) -> i64;
}
