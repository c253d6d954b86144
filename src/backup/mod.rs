//! Off-box backup of tenant relational files.
//!
//! The storage engine only depends on the [`CloudBackupProvider`] trait.
//! [`FsBackupProvider`] stores snapshots under a directory tree and is
//! suitable for a mounted volume or for tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;

pub mod fs_provider;

pub use fs_provider::FsBackupProvider;

/// Remote blob store holding one relational snapshot per tenant.
#[async_trait]
pub trait CloudBackupProvider: Send + Sync {
    /// Fetch the tenant's snapshot into a local temporary file.
    ///
    /// Returns `None` when no remote copy exists. The caller owns the
    /// returned file and must remove it.
    async fn download(&self, tenant: &str) -> Result<Option<PathBuf>>;

    /// Replace the tenant's remote snapshot with the file at `local_path`.
    async fn upload(&self, tenant: &str, local_path: &Path) -> Result<()>;

    /// Remove the tenant's remote snapshot; absent snapshots are not an error.
    async fn delete(&self, tenant: &str) -> Result<()>;

    /// Modification time of the tenant's remote snapshot, if one exists.
    async fn get_last_modified(&self, tenant: &str) -> Result<Option<DateTime<Utc>>>;
}
