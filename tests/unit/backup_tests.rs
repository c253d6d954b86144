use jobtrack_store::backup::{CloudBackupProvider, FsBackupProvider};
use jobtrack_store::AppError;

fn snapshot(dir: &std::path::Path, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.join("local.db");
    std::fs::write(&path, contents).expect("write local snapshot");
    path
}

#[tokio::test]
async fn upload_then_download_returns_identical_bytes() {
    let local = tempfile::tempdir().expect("local");
    let remote = tempfile::tempdir().expect("remote");
    let provider = FsBackupProvider::new(remote.path());
    let source = snapshot(local.path(), b"SQLite format 3\0 fake pages");

    provider.upload("alice", &source).await.expect("upload");
    let downloaded = provider
        .download("alice")
        .await
        .expect("download")
        .expect("snapshot present");

    assert_eq!(
        std::fs::read(&downloaded).expect("read download"),
        b"SQLite format 3\0 fake pages"
    );
    assert_ne!(downloaded, source);
    std::fs::remove_file(downloaded).expect("cleanup download");
}

#[tokio::test]
async fn upload_replaces_previous_snapshot() {
    let local = tempfile::tempdir().expect("local");
    let remote = tempfile::tempdir().expect("remote");
    let provider = FsBackupProvider::new(remote.path());

    provider
        .upload("alice", &snapshot(local.path(), b"first"))
        .await
        .expect("first upload");
    provider
        .upload("alice", &snapshot(local.path(), b"second"))
        .await
        .expect("second upload");

    let downloaded = provider
        .download("alice")
        .await
        .expect("download")
        .expect("present");
    assert_eq!(std::fs::read(&downloaded).expect("read"), b"second");
    std::fs::remove_file(downloaded).expect("cleanup download");

    let leftovers: Vec<_> = std::fs::read_dir(remote.path().join("alice"))
        .expect("tenant dir")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".partial"))
        .collect();
    assert!(leftovers.is_empty(), "staged files are renamed into place");
}

#[tokio::test]
async fn absent_snapshot_downloads_as_none() {
    let remote = tempfile::tempdir().expect("remote");
    let provider = FsBackupProvider::new(remote.path());

    assert!(provider.download("nobody").await.expect("download").is_none());
    assert!(provider
        .get_last_modified("nobody")
        .await
        .expect("last modified")
        .is_none());
}

#[tokio::test]
async fn delete_is_idempotent() {
    let local = tempfile::tempdir().expect("local");
    let remote = tempfile::tempdir().expect("remote");
    let provider = FsBackupProvider::new(remote.path());
    provider
        .upload("alice", &snapshot(local.path(), b"data"))
        .await
        .expect("upload");

    provider.delete("alice").await.expect("delete");
    provider.delete("alice").await.expect("delete again");
    assert!(provider.download("alice").await.expect("download").is_none());
}

#[tokio::test]
async fn tampered_snapshot_fails_checksum() {
    let local = tempfile::tempdir().expect("local");
    let remote = tempfile::tempdir().expect("remote");
    let provider = FsBackupProvider::new(remote.path());
    provider
        .upload("alice", &snapshot(local.path(), b"original"))
        .await
        .expect("upload");

    std::fs::write(remote.path().join("alice").join("store.db"), b"tampered").expect("tamper");

    let err = provider.download("alice").await.expect_err("mismatch");
    assert!(matches!(err, AppError::Backup(_)), "got {err}");
    assert!(err.to_string().contains("checksum mismatch"));
}

#[tokio::test]
async fn last_modified_tracks_uploads() {
    let local = tempfile::tempdir().expect("local");
    let remote = tempfile::tempdir().expect("remote");
    let provider = FsBackupProvider::new(remote.path());
    let before = chrono::Utc::now() - chrono::Duration::seconds(5);

    provider
        .upload("alice", &snapshot(local.path(), b"data"))
        .await
        .expect("upload");

    let modified = provider
        .get_last_modified("alice")
        .await
        .expect("last modified")
        .expect("present");
    assert!(modified > before);
    assert_eq!(provider.root(), remote.path());
}

#[tokio::test]
async fn tenants_are_stored_separately() {
    let local = tempfile::tempdir().expect("local");
    let remote = tempfile::tempdir().expect("remote");
    let provider = FsBackupProvider::new(remote.path());
    provider
        .upload("alice", &snapshot(local.path(), b"alice data"))
        .await
        .expect("upload");

    assert!(provider.download("bob").await.expect("download").is_none());
    provider.delete("bob").await.expect("deleting another tenant");
    assert!(provider
        .get_last_modified("alice")
        .await
        .expect("last modified")
        .is_some());
}
