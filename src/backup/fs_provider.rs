//! Filesystem-backed [`CloudBackupProvider`].
//!
//! Layout: `{root}/{tenant_dir}/store.db` plus a `store.db.sha256` sidecar
//! holding the hex digest. Uploads are staged next to the target and
//! renamed into place, so a crashed upload never replaces a good snapshot.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{tenant_dir_name, DB_FILE_NAME};
use crate::{AppError, Result};

use super::CloudBackupProvider;

const CHECKSUM_SUFFIX: &str = "sha256";

/// Backup provider storing snapshots in a local or mounted directory.
#[derive(Debug, Clone)]
pub struct FsBackupProvider {
    root: PathBuf,
}

impl FsBackupProvider {
    /// Create a provider rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot_path(&self, tenant: &str) -> PathBuf {
        self.root.join(tenant_dir_name(tenant)).join(DB_FILE_NAME)
    }

    fn checksum_path(&self, tenant: &str) -> PathBuf {
        self.root
            .join(tenant_dir_name(tenant))
            .join(format!("{DB_FILE_NAME}.{CHECKSUM_SUFFIX}"))
    }
}

fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn backup_err(action: &str, tenant: &str, err: impl std::fmt::Display) -> AppError {
    AppError::Backup(format!("{action} for tenant {tenant} failed: {err}"))
}

#[async_trait]
impl CloudBackupProvider for FsBackupProvider {
    async fn download(&self, tenant: &str) -> Result<Option<PathBuf>> {
        let snapshot = self.snapshot_path(tenant);
        let bytes = match fs::read(&snapshot).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(tenant, "no remote snapshot");
                return Ok(None);
            }
            Err(err) => return Err(backup_err("download", tenant, err)),
        };

        match fs::read_to_string(self.checksum_path(tenant)).await {
            Ok(expected) => {
                let actual = digest_hex(&bytes);
                if expected.trim() != actual {
                    return Err(backup_err(
                        "download",
                        tenant,
                        format!("checksum mismatch (expected {}, got {actual})", expected.trim()),
                    ));
                }
            }
            Err(err) => return Err(backup_err("checksum read", tenant, err)),
        }

        let temp = tempfile::Builder::new()
            .prefix("jobtrack-restore-")
            .suffix(".db")
            .tempfile()
            .map_err(|err| backup_err("download", tenant, err))?;
        let (_file, path) = temp
            .keep()
            .map_err(|err| backup_err("download", tenant, err))?;
        fs::write(&path, &bytes)
            .await
            .map_err(|err| backup_err("download", tenant, err))?;

        info!(tenant, bytes = bytes.len(), "remote snapshot downloaded");
        Ok(Some(path))
    }

    async fn upload(&self, tenant: &str, local_path: &Path) -> Result<()> {
        let bytes = fs::read(local_path)
            .await
            .map_err(|err| backup_err("upload", tenant, err))?;
        let snapshot = self.snapshot_path(tenant);
        let Some(dir) = snapshot.parent() else {
            return Err(backup_err("upload", tenant, "snapshot path has no parent"));
        };
        fs::create_dir_all(dir)
            .await
            .map_err(|err| backup_err("upload", tenant, err))?;

        let staged = dir.join(format!("{DB_FILE_NAME}.{}.partial", Uuid::new_v4()));
        let staged_sum = dir.join(format!("{DB_FILE_NAME}.{CHECKSUM_SUFFIX}.{}.partial", Uuid::new_v4()));
        let result = async {
            fs::write(&staged, &bytes).await?;
            fs::write(&staged_sum, digest_hex(&bytes)).await?;
            fs::rename(&staged, &snapshot).await?;
            fs::rename(&staged_sum, self.checksum_path(tenant)).await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&staged).await;
            let _ = fs::remove_file(&staged_sum).await;
            return Err(backup_err("upload", tenant, err));
        }

        info!(tenant, bytes = bytes.len(), "snapshot uploaded");
        Ok(())
    }

    async fn delete(&self, tenant: &str) -> Result<()> {
        for path in [self.snapshot_path(tenant), self.checksum_path(tenant)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(backup_err("delete", tenant, err)),
            }
        }
        info!(tenant, "remote snapshot deleted");
        Ok(())
    }

    async fn get_last_modified(&self, tenant: &str) -> Result<Option<DateTime<Utc>>> {
        match fs::metadata(self.snapshot_path(tenant)).await {
            Ok(meta) => {
                let modified = meta
                    .modified()
                    .map_err(|err| backup_err("stat", tenant, err))?;
                Ok(Some(DateTime::<Utc>::from(modified)))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(backup_err("stat", tenant, err)),
        }
    }
}
