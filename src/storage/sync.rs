//! Flushing dirty cache state into the relational file, followed by an
//! optional snapshot upload to the backup provider.

use chrono::Utc;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backup::CloudBackupProvider;
use crate::cache::store::CacheOp;
use crate::cache::{keys, CacheKey, CacheStore, Keyspace};
use crate::models::{Company, Job, MatchResult, Profile};
use crate::persistence::{db, profile_repo, Repositories};
use crate::{AppError, Result};

use super::user_storage::{StorageState, UserStorage, BACKUP_PENDING_MARKER, DIRTY_MARKER};

/// Outcome of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Nothing was dirty and no upload was pending.
    pub skipped: bool,
    /// The profile was written relationally.
    pub profile_synced: bool,
    /// Companies, jobs and match results upserted.
    pub upserted: usize,
    /// Pending deletes applied.
    pub deleted: usize,
    /// Records that could not be written or decoded.
    pub failed: usize,
    /// A snapshot was uploaded to the backup provider.
    pub backed_up: bool,
}

impl SyncReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

impl UserStorage {
    /// Flush cached changes into the relational file and, in hosted mode,
    /// upload a snapshot of it.
    ///
    /// Serializes against every other write through the instance lock.
    /// `cancel` aborts only the upload step.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Sync` if any record failed to flush (the instance
    /// stays dirty and the next pass retries), `AppError::Backup` if the
    /// upload failed after a successful flush, or `AppError::Closed`.
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let mut state = self.state.write().await;
        self.sync_locked(&mut state, cancel).await
    }

    pub(super) async fn sync_locked(
        &self,
        state: &mut StorageState,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let (cache, repos) = state.handles()?;
        if !state.dirty && !state.backup_pending {
            return Ok(SyncReport::skipped());
        }

        let mut report = SyncReport::default();
        if state.dirty {
            self.flush(&cache, &repos, &mut report).await?;
            state.dirty = false;
            state.last_sync = Utc::now();

            let mut ops = vec![CacheOp::Remove(CacheKey::meta(&self.tenant, DIRTY_MARKER))];
            if self.backup.is_some() {
                state.backup_pending = true;
                ops.push(CacheOp::Put(
                    CacheKey::meta(&self.tenant, BACKUP_PENDING_MARKER),
                    vec![1],
                ));
            }
            if let Err(err) = cache.apply(ops) {
                warn!(tenant = %self.tenant, %err, "failed to update sync markers");
            }
            info!(
                tenant = %self.tenant,
                upserted = report.upserted,
                deleted = report.deleted,
                "flushed cache to relational store"
            );
        }

        if state.backup_pending {
            if let Some(provider) = &self.backup {
                self.upload_snapshot(provider.as_ref(), &repos, cancel).await?;
                state.backup_pending = false;
                report.backed_up = true;
                if let Err(err) = cache.remove(&CacheKey::meta(&self.tenant, BACKUP_PENDING_MARKER)) {
                    warn!(tenant = %self.tenant, %err, "failed to clear backup marker");
                }
            }
        }

        Ok(report)
    }

    async fn flush(
        &self,
        cache: &CacheStore,
        repos: &Repositories,
        report: &mut SyncReport,
    ) -> Result<()> {
        let tenant = self.tenant.as_str();

        let profile_key = CacheKey::singleton(Keyspace::Profile, tenant);
        if let Some(profile) = cache.get_json::<Profile>(&profile_key).map_err(sync_error)? {
            sync_profile(repos, tenant, &profile)
                .await
                .map_err(sync_error)?;
            report.profile_synced = true;
        }

        // Children before parents so foreign keys never dangle.
        let mut pending: Vec<(Keyspace, i64)> = cache
            .keys_with_prefix(&CacheKey::family_prefix(Keyspace::Tombstone, tenant))
            .map_err(sync_error)?
            .iter()
            .filter_map(|key| keys::parse_tombstone(key, tenant))
            .collect();
        pending.sort_by_key(|(space, id)| (delete_rank(*space), *id));
        for (space, id) in pending {
            let applied = match space {
                Keyspace::MatchResult => repos.matches.delete(id).await,
                Keyspace::Job => repos.jobs.delete(id).await,
                Keyspace::Company => repos.companies.delete(id).await,
                _ => continue,
            };
            match applied {
                Ok(_) => {
                    report.deleted += 1;
                    if let Err(err) = cache.remove(&CacheKey::tombstone(space, tenant, id)) {
                        warn!(tenant, kind = space.prefix(), id, %err, "failed to clear tombstone");
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(tenant, kind = space.prefix(), id, %err, "failed to apply delete");
                }
            }
        }

        for company in decode_family::<Company>(cache, tenant, Keyspace::Company, report)? {
            let result = repos.companies.upsert(&company).await;
            tally(result, "company", company.id, tenant, report);
        }
        for job in decode_family::<Job>(cache, tenant, Keyspace::Job, report)? {
            let result = repos.jobs.upsert(&job).await;
            tally(result, "job", job.id, tenant, report);
        }
        for result in decode_family::<MatchResult>(cache, tenant, Keyspace::MatchResult, report)? {
            let outcome = repos.matches.upsert(&result).await;
            tally(outcome, "match", result.id, tenant, report);
        }

        db::checkpoint(&repos.db).await.map_err(sync_error)?;

        if report.failed > 0 {
            return Err(AppError::Sync(format!(
                "{} record(s) failed to sync",
                report.failed
            )));
        }
        Ok(())
    }

    /// Copy the relational file aside and hand the copy to the provider.
    async fn upload_snapshot(
        &self,
        provider: &dyn CloudBackupProvider,
        repos: &Repositories,
        cancel: &CancellationToken,
    ) -> Result<()> {
        db::checkpoint(&repos.db).await.map_err(backup_error)?;

        let snapshot = tempfile::Builder::new()
            .prefix(".snapshot-")
            .suffix(".db")
            .tempfile_in(self.config.tenant_dir(&self.tenant))
            .map_err(|err| AppError::Backup(format!("failed to create snapshot file: {err}")))?
            .into_temp_path();

        let uploaded: Result<()> = async {
            tokio::fs::copy(self.config.db_path(&self.tenant), &snapshot)
                .await
                .map_err(|err| AppError::Backup(format!("failed to stage snapshot: {err}")))?;
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(AppError::Backup("upload cancelled".into())),
                result = provider.upload(&self.tenant, &snapshot) => result,
            }
        }
        .await;

        if let Err(err) = snapshot.close() {
            warn!(tenant = %self.tenant, %err, "failed to remove snapshot file");
        }

        uploaded.map_err(backup_error)?;
        debug!(tenant = %self.tenant, "uploaded relational snapshot");
        Ok(())
    }
}

/// Write the tenant row and its profile in one transaction.
async fn sync_profile(repos: &Repositories, tenant: &str, profile: &Profile) -> Result<()> {
    let mut tx = repos.db.begin().await?;
    profile_repo::ensure_tenant_with(&mut *tx, tenant).await?;
    profile_repo::upsert_with(&mut *tx, profile).await?;
    tx.commit().await?;
    Ok(())
}

fn delete_rank(space: Keyspace) -> u8 {
    match space {
        Keyspace::MatchResult => 0,
        Keyspace::Job => 1,
        Keyspace::Company => 2,
        _ => 3,
    }
}

/// Decode one cached family; undecodable entries are counted as failures.
fn decode_family<T: DeserializeOwned>(
    cache: &CacheStore,
    tenant: &str,
    space: Keyspace,
    report: &mut SyncReport,
) -> Result<Vec<T>> {
    let entries = cache
        .scan_prefix(&CacheKey::family_prefix(space, tenant))
        .map_err(sync_error)?;
    let mut records = Vec::with_capacity(entries.len());
    for (key, bytes) in entries {
        match serde_json::from_slice(&bytes) {
            Ok(record) => records.push(record),
            Err(err) => {
                report.failed += 1;
                warn!(tenant, %key, %err, "skipping undecodable cache entry");
            }
        }
    }
    Ok(records)
}

fn tally(result: Result<()>, kind: &str, id: i64, tenant: &str, report: &mut SyncReport) {
    match result {
        Ok(()) => report.upserted += 1,
        Err(err) => {
            report.failed += 1;
            warn!(tenant, kind, id, %err, "failed to upsert record");
        }
    }
}

fn sync_error(err: AppError) -> AppError {
    match err {
        AppError::Sync(_) => err,
        other => AppError::Sync(other.to_string()),
    }
}

fn backup_error(err: AppError) -> AppError {
    match err {
        AppError::Backup(_) => err,
        other => AppError::Backup(other.to_string()),
    }
}
