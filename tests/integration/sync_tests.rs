//! Flushing cached writes into the relational file and uploading snapshots.

use std::time::Duration;

use jobtrack_store::cache::{CacheKey, Keyspace};
use jobtrack_store::models::{Company, Job};
use jobtrack_store::AppError;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{fs_backup, open_hosted, open_local, relational};

#[tokio::test]
async fn fresh_tenant_has_nothing_to_sync() {
    let temp = tempfile::tempdir().expect("tempdir");
    let storage = open_local(temp.path(), "alice").await;

    assert!(!storage.is_dirty().await);
    let report = storage
        .sync(&CancellationToken::new())
        .await
        .expect("sync");
    assert!(report.skipped);
}

#[tokio::test]
async fn sync_writes_records_and_clears_dirty() {
    let temp = tempfile::tempdir().expect("tempdir");
    let storage = open_local(temp.path(), "alice").await;
    let company = storage
        .save_company(Company::new("Acme"))
        .await
        .expect("company");
    let job = storage
        .save_job(Job::new("Engineer", Some(company.id)))
        .await
        .expect("job");
    let before = storage.last_sync_time().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let report = storage
        .sync(&CancellationToken::new())
        .await
        .expect("sync");

    assert!(!report.skipped);
    assert_eq!(report.upserted, 2);
    assert_eq!(report.failed, 0);
    assert!(!report.backed_up, "no provider configured");
    assert!(!storage.is_dirty().await);
    assert!(storage.last_sync_time().await > before);

    let repos = storage.repositories().await.expect("repos");
    assert_eq!(
        repos.companies.get(company.id).await.expect("query"),
        Some(company)
    );
    assert_eq!(repos.jobs.get(job.id).await.expect("query"), Some(job));

    let cache = storage.cache().await.expect("cache");
    assert!(!cache
        .contains(&CacheKey::meta("alice", "dirty"))
        .expect("contains"));
}

#[tokio::test]
async fn second_sync_without_writes_is_skipped() {
    let temp = tempfile::tempdir().expect("tempdir");
    let storage = open_local(temp.path(), "alice").await;
    storage
        .save_job(Job::new("Engineer", None))
        .await
        .expect("job");

    let cancel = CancellationToken::new();
    let first = storage.sync(&cancel).await.expect("first sync");
    let second = storage.sync(&cancel).await.expect("second sync");

    assert!(!first.skipped);
    assert!(second.skipped);
    assert_eq!(second.upserted, 0);
}

#[tokio::test]
async fn undecodable_entry_fails_sync_and_keeps_dirty() {
    let temp = tempfile::tempdir().expect("tempdir");
    let storage = open_local(temp.path(), "alice").await;
    let job = storage
        .save_job(Job::new("Engineer", None))
        .await
        .expect("job");

    let cache = storage.cache().await.expect("cache");
    let corrupt = CacheKey::entity(Keyspace::Job, "alice", 9_999);
    cache.put(&corrupt, b"not json").expect("write corrupt entry");

    let err = storage
        .sync(&CancellationToken::new())
        .await
        .expect_err("corrupt entry");
    assert!(matches!(err, AppError::Sync(_)), "got {err}");
    assert!(storage.is_dirty().await);

    let repos = storage.repositories().await.expect("repos");
    assert!(
        repos.jobs.get(job.id).await.expect("query").is_some(),
        "healthy records are still written"
    );

    cache.remove(&corrupt).expect("drop corrupt entry");
    let report = storage
        .sync(&CancellationToken::new())
        .await
        .expect("retry sync");
    assert_eq!(report.failed, 0);
    assert!(!storage.is_dirty().await);
}

#[tokio::test]
async fn close_flushes_pending_writes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let storage = open_local(temp.path(), "alice").await;
    let job = storage
        .save_job(Job::new("Engineer", None))
        .await
        .expect("job");

    storage.close().await.expect("close");
    drop(storage);

    let repos = relational(temp.path(), "alice").await;
    let row = repos.jobs.get(job.id).await.expect("query");
    assert_eq!(row.map(|job| job.title), Some("Engineer".to_owned()));
}

#[tokio::test]
async fn hosted_sync_uploads_snapshot() {
    let temp = tempfile::tempdir().expect("tempdir");
    let remote = tempfile::tempdir().expect("remote");
    let storage = open_hosted(temp.path(), remote.path(), "alice").await;
    storage
        .save_company(Company::new("Acme"))
        .await
        .expect("company");

    let report = storage
        .sync(&CancellationToken::new())
        .await
        .expect("sync");

    assert!(report.backed_up);
    let modified = fs_backup(remote.path())
        .get_last_modified("alice")
        .await
        .expect("last modified");
    assert!(modified.is_some());
    assert_eq!(
        storage.remote_last_modified().await.expect("remote"),
        modified
    );
}

#[tokio::test]
async fn cancelled_upload_is_retried_by_next_sync() {
    let temp = tempfile::tempdir().expect("tempdir");
    let remote = tempfile::tempdir().expect("remote");
    let storage = open_hosted(temp.path(), remote.path(), "alice").await;
    storage
        .save_company(Company::new("Acme"))
        .await
        .expect("company");

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let err = storage
        .sync(&cancelled)
        .await
        .expect_err("upload cancelled");
    assert!(matches!(err, AppError::Backup(_)), "got {err}");
    assert!(!storage.is_dirty().await, "the flush itself succeeded");
    assert!(fs_backup(remote.path())
        .get_last_modified("alice")
        .await
        .expect("last modified")
        .is_none());

    let report = storage
        .sync(&CancellationToken::new())
        .await
        .expect("retry");
    assert!(!report.skipped);
    assert_eq!(report.upserted, 0);
    assert!(report.backed_up);
}
