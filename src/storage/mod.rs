//! Storage engine: per-tenant instances, their sync pipeline, and the
//! registry that hands them out.

pub mod ids;
pub mod provider;
mod scheduler;
pub mod sync;
pub mod user_storage;

pub use provider::{spawn_cleanup_task, StorageProvider};
pub use sync::SyncReport;
pub use user_storage::UserStorage;
