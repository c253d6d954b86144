//! Hosted mode: restoring the relational file from the backup store at open
//! and keeping unuploaded changes safe across restarts.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobtrack_store::backup::{CloudBackupProvider, FsBackupProvider};
use jobtrack_store::models::Company;
use jobtrack_store::{AppError, Result, UserStorage};
use tokio_util::sync::CancellationToken;

use super::test_helpers::{fs_backup, open_hosted, test_config};

/// Filesystem store whose uploads can be switched off.
struct FlakyBackup {
    inner: FsBackupProvider,
    fail_uploads: AtomicBool,
}

impl FlakyBackup {
    fn new(root: &Path, fail_uploads: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: FsBackupProvider::new(root),
            fail_uploads: AtomicBool::new(fail_uploads),
        })
    }
}

#[async_trait]
impl CloudBackupProvider for FlakyBackup {
    async fn download(&self, tenant: &str) -> Result<Option<PathBuf>> {
        self.inner.download(tenant).await
    }

    async fn upload(&self, tenant: &str, local_path: &Path) -> Result<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(AppError::Backup("remote unavailable".into()));
        }
        self.inner.upload(tenant, local_path).await
    }

    async fn delete(&self, tenant: &str) -> Result<()> {
        self.inner.delete(tenant).await
    }

    async fn get_last_modified(&self, tenant: &str) -> Result<Option<DateTime<Utc>>> {
        self.inner.get_last_modified(tenant).await
    }
}

async fn open_with(base: &Path, backup: Arc<FlakyBackup>) -> Arc<UserStorage> {
    let backup: Arc<dyn CloudBackupProvider> = backup;
    UserStorage::open("alice", Arc::new(test_config(base)), Some(backup))
        .await
        .expect("open hosted storage")
}

#[tokio::test]
async fn fresh_host_restores_remote_snapshot() {
    let first_host = tempfile::tempdir().expect("first host");
    let second_host = tempfile::tempdir().expect("second host");
    let remote = tempfile::tempdir().expect("remote");

    let storage = open_hosted(first_host.path(), remote.path(), "alice").await;
    let company = storage
        .save_company(Company::new("Acme"))
        .await
        .expect("save");
    let profile = storage.get_profile().await.expect("profile");
    storage.close().await.expect("close uploads snapshot");

    let restored = open_hosted(second_host.path(), remote.path(), "alice").await;
    assert_eq!(restored.get_company(company.id).await.expect("company"), company);
    assert_eq!(restored.get_profile().await.expect("profile").id, profile.id);
    assert!(!restored.is_dirty().await);

    let next = restored
        .save_company(Company::new("Globex"))
        .await
        .expect("save after restore");
    assert!(next.id > company.id, "ids continue past restored records");
}

#[tokio::test]
async fn missing_remote_snapshot_starts_empty() {
    let temp = tempfile::tempdir().expect("tempdir");
    let remote = tempfile::tempdir().expect("remote");

    let storage = open_hosted(temp.path(), remote.path(), "alice").await;
    assert!(storage.list_companies().await.expect("list").is_empty());
    assert_eq!(storage.remote_last_modified().await.expect("remote"), None);
}

#[tokio::test]
async fn corrupt_remote_snapshot_fails_open() {
    let first_host = tempfile::tempdir().expect("first host");
    let second_host = tempfile::tempdir().expect("second host");
    let remote = tempfile::tempdir().expect("remote");

    let storage = open_hosted(first_host.path(), remote.path(), "alice").await;
    storage
        .save_company(Company::new("Acme"))
        .await
        .expect("save");
    storage.close().await.expect("close");

    let checksum = remote.path().join("alice").join("store.db.sha256");
    std::fs::write(&checksum, "0000").expect("tamper checksum");

    let err = UserStorage::open(
        "alice",
        Arc::new(test_config(second_host.path())),
        Some(fs_backup(remote.path())),
    )
    .await
    .err()
    .expect("checksum mismatch must fail open");
    assert!(matches!(err, AppError::Init(_)), "got {err}");
}

#[tokio::test]
async fn failed_upload_is_retried_on_close() {
    let temp = tempfile::tempdir().expect("tempdir");
    let remote = tempfile::tempdir().expect("remote");
    let backup = FlakyBackup::new(remote.path(), true);
    let storage = open_with(temp.path(), Arc::clone(&backup)).await;
    storage
        .save_company(Company::new("Acme"))
        .await
        .expect("save");

    let err = storage
        .sync(&CancellationToken::new())
        .await
        .expect_err("upload fails");
    assert!(matches!(err, AppError::Backup(_)), "got {err}");

    backup.fail_uploads.store(false, Ordering::SeqCst);
    storage.close().await.expect("close retries upload");

    assert!(backup
        .get_last_modified("alice")
        .await
        .expect("last modified")
        .is_some());
}

#[tokio::test]
async fn unuploaded_changes_are_not_overwritten_by_older_snapshot() {
    let temp = tempfile::tempdir().expect("tempdir");
    let remote = tempfile::tempdir().expect("remote");
    let backup = FlakyBackup::new(remote.path(), false);

    let storage = open_with(temp.path(), Arc::clone(&backup)).await;
    let uploaded = storage
        .save_company(Company::new("Acme"))
        .await
        .expect("save");
    storage
        .sync(&CancellationToken::new())
        .await
        .expect("first sync uploads");

    backup.fail_uploads.store(true, Ordering::SeqCst);
    let local_only = storage
        .save_company(Company::new("Globex"))
        .await
        .expect("save");
    storage
        .sync(&CancellationToken::new())
        .await
        .expect_err("second upload fails");
    // Simulated crash: no close, so no final upload attempt.
    drop(storage);

    backup.fail_uploads.store(false, Ordering::SeqCst);
    let reopened = open_with(temp.path(), Arc::clone(&backup)).await;
    let repos = reopened.repositories().await.expect("repos");
    assert!(repos.companies.get(uploaded.id).await.expect("query").is_some());
    assert!(
        repos.companies.get(local_only.id).await.expect("query").is_some(),
        "the local file was kept instead of the stale snapshot"
    );

    let report = reopened
        .sync(&CancellationToken::new())
        .await
        .expect("pending upload completes");
    assert!(report.backed_up);
}
