//! Per-tenant storage engine.
//!
//! Reads are cache-aside: the embedded cache answers first and a miss falls
//! back to the relational file, repairing the cache on the way out. Writes
//! land only in the cache and mark the instance dirty; the relational file
//! catches up on the next sync. Pending deletes are kept as tombstones so a
//! cache miss can never resurrect a row that is still waiting to be removed.

use std::collections::{BTreeMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::backup::CloudBackupProvider;
use crate::cache::store::CacheOp;
use crate::cache::{keys, CacheKey, CacheStore, Keyspace};
use crate::config::StorageConfig;
use crate::models::{Company, Job, MatchResult, Profile, Record};
use crate::persistence::{db, Repositories};
use crate::{AppError, Result};

use super::ids::IdAllocator;
use super::scheduler::spawn_sync_task;

/// Meta key set while the cache holds changes the relational file lacks.
pub(crate) const DIRTY_MARKER: &str = "dirty";
/// Meta key holding the id high-water mark.
pub(crate) const NEXT_ID_MARKER: &str = "next_id";
/// Meta key set while the local relational file is newer than the remote snapshot.
pub(crate) const BACKUP_PENDING_MARKER: &str = "backup_pending";

/// Tombstoned `(entity keyspace, id)` pairs.
pub(crate) type Tombstones = HashSet<(Keyspace, i64)>;

/// Mutable state guarded by the instance lock.
pub(crate) struct StorageState {
    pub(crate) cache: Option<CacheStore>,
    pub(crate) repos: Option<Repositories>,
    pub(crate) dirty: bool,
    pub(crate) backup_pending: bool,
    pub(crate) last_sync: DateTime<Utc>,
}

impl StorageState {
    /// Both tier handles, or `AppError::Closed` once they have been released.
    pub(crate) fn handles(&self) -> Result<(CacheStore, Repositories)> {
        match (&self.cache, &self.repos) {
            (Some(cache), Some(repos)) => Ok((cache.clone(), repos.clone())),
            _ => Err(AppError::Closed("storage has been closed".into())),
        }
    }
}

/// One tenant's dual-tier store.
pub struct UserStorage {
    pub(super) tenant: String,
    pub(super) config: Arc<StorageConfig>,
    pub(super) backup: Option<Arc<dyn CloudBackupProvider>>,
    pub(super) state: RwLock<StorageState>,
    ids: IdAllocator,
    closed: AtomicBool,
    cancel: CancellationToken,
    released: CancellationToken,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl UserStorage {
    /// Open (or create) the storage for `tenant`.
    ///
    /// When a backup provider is supplied the tenant is in hosted mode: an
    /// existing remote snapshot is installed as the local relational file
    /// before it is opened, unless the local file holds changes that were
    /// never uploaded. The cache is then warmed with every relational record
    /// it does not already hold, and the background sync ticker is started
    /// unless the configuration is ephemeral.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an empty tenant id and `AppError::Init`
    /// if the restore, either tier, or the warm-up fails.
    pub async fn open(
        tenant: &str,
        config: Arc<StorageConfig>,
        backup: Option<Arc<dyn CloudBackupProvider>>,
    ) -> Result<Arc<Self>> {
        if tenant.is_empty() {
            return Err(AppError::Config("tenant id must not be empty".into()));
        }

        let span = info_span!("open_storage", tenant);
        async move {
            let cache = CacheStore::open(&config.cache_dir(tenant)).map_err(init_error)?;
            let backup_pending = backup.is_some()
                && cache
                    .contains(&CacheKey::meta(tenant, BACKUP_PENDING_MARKER))
                    .map_err(init_error)?;

            let db_path = config.db_path(tenant);
            if let Some(provider) = &backup {
                if backup_pending && db_path.exists() {
                    warn!("local relational file has changes not yet uploaded; skipping restore");
                } else {
                    restore_from_backup(provider.as_ref(), tenant, &db_path).await?;
                }
            }

            let pool = db::connect(&db_path, config.busy_timeout(), config.max_connections)
                .await
                .map_err(init_error)?;
            let repos = Repositories::new(Arc::new(pool));

            let ids = IdAllocator::starting_after(
                high_water_mark(&cache, &repos, tenant)
                    .await
                    .map_err(init_error)?,
            );
            seed_profile(&cache, &repos, &ids, tenant)
                .await
                .map_err(init_error)?;
            let warmed = warm_cache(&cache, &repos, tenant)
                .await
                .map_err(init_error)?;
            let dirty = cache
                .contains(&CacheKey::meta(tenant, DIRTY_MARKER))
                .map_err(init_error)?;

            let storage = Arc::new(Self {
                tenant: tenant.to_owned(),
                backup,
                state: RwLock::new(StorageState {
                    cache: Some(cache),
                    repos: Some(repos),
                    dirty,
                    backup_pending,
                    last_sync: Utc::now(),
                }),
                ids,
                closed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                released: CancellationToken::new(),
                sync_task: Mutex::new(None),
                config,
            });

            if !storage.config.ephemeral {
                let handle = spawn_sync_task(
                    Arc::downgrade(&storage),
                    storage.tenant.clone(),
                    storage.config.sync_interval(),
                    storage.cancel.clone(),
                );
                *storage.sync_task.lock().await = Some(handle);
            }

            info!(warmed, dirty, backup_pending, "tenant storage opened");
            Ok(storage)
        }
        .instrument(span)
        .await
    }

    /// Tenant this instance serves.
    #[must_use]
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether the cache holds changes not yet flushed to the relational file.
    pub async fn is_dirty(&self) -> bool {
        self.state.read().await.dirty
    }

    /// Time of the last successful flush (the open time before the first one).
    pub async fn last_sync_time(&self) -> DateTime<Utc> {
        self.state.read().await.last_sync
    }

    /// Handle to the embedded cache.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` after `close`.
    pub async fn cache(&self) -> Result<CacheStore> {
        Ok(self.state.read().await.handles()?.0)
    }

    /// Handle to the relational repositories.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` after `close`.
    pub async fn repositories(&self) -> Result<Repositories> {
        Ok(self.state.read().await.handles()?.1)
    }

    /// Modification time of the remote snapshot, `None` without a backup provider.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backup` if the provider cannot be queried.
    pub async fn remote_last_modified(&self) -> Result<Option<DateTime<Utc>>> {
        match &self.backup {
            Some(provider) => provider.get_last_modified(&self.tenant).await,
            None => Ok(None),
        }
    }

    // ─── Profile ────────────────────────────────────────────

    /// Fetch the tenant's profile.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if neither tier holds it, or a tier error.
    pub async fn get_profile(&self) -> Result<Profile> {
        let state = self.state.read().await;
        let (cache, repos) = state.handles()?;
        let key = CacheKey::singleton(Keyspace::Profile, &self.tenant);
        if let Some(profile) = cache.get_json(&key)? {
            return Ok(profile);
        }

        let profile = repos
            .profiles
            .get(&self.tenant)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("profile for tenant {}", self.tenant)))?;
        self.repair(&cache, &key, &profile);
        Ok(profile)
    }

    /// Store the tenant's profile.
    ///
    /// The profile keeps the tenant's existing id and is always owned by
    /// this tenant, whatever the caller set.
    ///
    /// # Errors
    ///
    /// Returns a cache, codec or relational error.
    pub async fn save_profile(&self, mut profile: Profile) -> Result<Profile> {
        let mut state = self.state.write().await;
        let (cache, repos) = state.handles()?;
        let key = CacheKey::singleton(Keyspace::Profile, &self.tenant);
        let mut ops = Vec::new();

        let current = match cache.get_json::<Profile>(&key)? {
            Some(current) => Some(current),
            None => repos.profiles.get(&self.tenant).await?,
        };
        let allocated = match current {
            Some(current) => {
                profile.id = current.id;
                if is_unset(profile.created_at) {
                    profile.created_at = current.created_at;
                }
                false
            }
            None => self.assign_id(&mut profile.id, &mut ops)?,
        };

        let now = Utc::now();
        profile.tenant_id.clone_from(&self.tenant);
        stamp_created(&mut profile.created_at, allocated, now);
        profile.updated_at = now;

        ops.push(CacheOp::Put(key, serde_json::to_vec(&profile)?));
        self.commit(&mut state, &cache, ops)?;
        debug!(tenant = %self.tenant, "profile saved");
        Ok(profile)
    }

    // ─── Companies ──────────────────────────────────────────

    /// List every company ordered by name.
    ///
    /// # Errors
    ///
    /// Returns a cache, codec or relational error.
    pub async fn list_companies(&self) -> Result<Vec<Company>> {
        let state = self.state.read().await;
        let (cache, repos) = state.handles()?;
        let key = CacheKey::list(Keyspace::Companies, &self.tenant, None);
        if let Some(view) = cache.get_json(&key)? {
            return Ok(view);
        }

        let tombstones = tombstones(&cache, &self.tenant)?;
        let mut companies = merge_views(
            repos.companies.list().await?,
            cached_entities(&cache, Keyspace::Company, &self.tenant)?,
            Keyspace::Company,
            &tombstones,
        );
        companies.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        self.repair(&cache, &key, &companies);
        Ok(companies)
    }

    /// Fetch one company.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the company does not exist or is
    /// pending deletion.
    pub async fn get_company(&self, id: i64) -> Result<Company> {
        let state = self.state.read().await;
        let (cache, repos) = state.handles()?;
        let key = CacheKey::entity(Keyspace::Company, &self.tenant, id);
        if let Some(company) = cache.get_json(&key)? {
            return Ok(company);
        }
        if cache.contains(&CacheKey::tombstone(Keyspace::Company, &self.tenant, id))? {
            return Err(not_found::<Company>(id));
        }

        let company = repos
            .companies
            .get(id)
            .await?
            .ok_or_else(|| not_found::<Company>(id))?;
        self.repair(&cache, &key, &company);
        Ok(company)
    }

    /// Create or update a company; an id of `0` allocates a new one.
    ///
    /// # Errors
    ///
    /// Returns a cache or codec error.
    pub async fn save_company(&self, mut company: Company) -> Result<Company> {
        let mut state = self.state.write().await;
        let (cache, _) = state.handles()?;
        let mut ops = Vec::new();

        let allocated = self.assign_id(&mut company.id, &mut ops)?;
        let now = Utc::now();
        stamp_created(&mut company.created_at, allocated, now);
        company.updated_at = now;

        self.put_entity(Keyspace::Company, &company, &mut ops)?;
        ops.push(self.invalidate(Keyspace::Companies));
        self.commit(&mut state, &cache, ops)?;
        debug!(tenant = %self.tenant, company_id = company.id, "company saved");
        Ok(company)
    }

    /// Delete a company; jobs that referenced it are detached.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the company does not exist.
    pub async fn delete_company(&self, id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        let (cache, repos) = state.handles()?;
        if !self.exists(&cache, &repos, Keyspace::Company, id).await? {
            return Err(not_found::<Company>(id));
        }

        let now = Utc::now();
        let mut ops = vec![
            CacheOp::Remove(CacheKey::entity(Keyspace::Company, &self.tenant, id)),
            CacheOp::Put(CacheKey::tombstone(Keyspace::Company, &self.tenant, id), vec![1]),
            self.invalidate(Keyspace::Companies),
            self.invalidate(Keyspace::Jobs),
        ];
        let mut detached = 0usize;
        for mut job in cached_entities::<Job>(&cache, Keyspace::Job, &self.tenant)? {
            if job.company_id == Some(id) {
                job.company_id = None;
                job.updated_at = now;
                ops.push(CacheOp::Put(
                    CacheKey::entity(Keyspace::Job, &self.tenant, job.id),
                    serde_json::to_vec(&job)?,
                ));
                detached += 1;
            }
        }

        self.commit(&mut state, &cache, ops)?;
        info!(tenant = %self.tenant, company_id = id, detached, "company deleted");
        Ok(())
    }

    // ─── Jobs ───────────────────────────────────────────────

    /// List jobs, most recently updated first, optionally for one company.
    ///
    /// # Errors
    ///
    /// Returns a cache, codec or relational error.
    pub async fn list_jobs(&self, company_filter: Option<i64>) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        let (cache, repos) = state.handles()?;
        let qualifier = company_filter.map(|id| format!("company={id}"));
        let key = CacheKey::list(Keyspace::Jobs, &self.tenant, qualifier.as_deref());
        if let Some(view) = cache.get_json(&key)? {
            return Ok(view);
        }

        let tombstones = tombstones(&cache, &self.tenant)?;
        let mut jobs = merge_views(
            repos.jobs.list(company_filter).await?,
            cached_entities(&cache, Keyspace::Job, &self.tenant)?,
            Keyspace::Job,
            &tombstones,
        );
        for job in &mut jobs {
            detach_deleted_company(job, &tombstones);
        }
        if let Some(company_id) = company_filter {
            jobs.retain(|job| job.company_id == Some(company_id));
        }
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));

        self.repair(&cache, &key, &jobs);
        Ok(jobs)
    }

    /// Fetch one job.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the job does not exist or is pending
    /// deletion.
    pub async fn get_job(&self, id: i64) -> Result<Job> {
        let state = self.state.read().await;
        let (cache, repos) = state.handles()?;
        let key = CacheKey::entity(Keyspace::Job, &self.tenant, id);
        if let Some(job) = cache.get_json(&key)? {
            return Ok(job);
        }
        if cache.contains(&CacheKey::tombstone(Keyspace::Job, &self.tenant, id))? {
            return Err(not_found::<Job>(id));
        }

        let mut job = repos
            .jobs
            .get(id)
            .await?
            .ok_or_else(|| not_found::<Job>(id))?;
        if let Some(company_id) = job.company_id {
            if cache.contains(&CacheKey::tombstone(Keyspace::Company, &self.tenant, company_id))? {
                job.company_id = None;
            }
        }
        self.repair(&cache, &key, &job);
        Ok(job)
    }

    /// Create or update a job; an id of `0` allocates a new one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `company_id` names an unknown company.
    pub async fn save_job(&self, mut job: Job) -> Result<Job> {
        let mut state = self.state.write().await;
        let (cache, repos) = state.handles()?;
        if let Some(company_id) = job.company_id {
            if !self.exists(&cache, &repos, Keyspace::Company, company_id).await? {
                return Err(not_found::<Company>(company_id));
            }
        }

        let mut ops = Vec::new();
        let allocated = self.assign_id(&mut job.id, &mut ops)?;
        let now = Utc::now();
        stamp_created(&mut job.created_at, allocated, now);
        job.updated_at = now;

        self.put_entity(Keyspace::Job, &job, &mut ops)?;
        ops.push(self.invalidate(Keyspace::Jobs));
        self.commit(&mut state, &cache, ops)?;
        debug!(tenant = %self.tenant, job_id = job.id, "job saved");
        Ok(job)
    }

    /// Delete a job together with its match results.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the job does not exist.
    pub async fn delete_job(&self, id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        let (cache, repos) = state.handles()?;
        if !self.exists(&cache, &repos, Keyspace::Job, id).await? {
            return Err(not_found::<Job>(id));
        }

        let mut ops = vec![
            CacheOp::Remove(CacheKey::entity(Keyspace::Job, &self.tenant, id)),
            CacheOp::Put(CacheKey::tombstone(Keyspace::Job, &self.tenant, id), vec![1]),
            self.invalidate(Keyspace::Jobs),
            self.invalidate(Keyspace::MatchHistory),
        ];
        let mut dropped = 0usize;
        for result in cached_entities::<MatchResult>(&cache, Keyspace::MatchResult, &self.tenant)? {
            if result.job_id == id {
                ops.push(CacheOp::Remove(CacheKey::entity(
                    Keyspace::MatchResult,
                    &self.tenant,
                    result.id,
                )));
                dropped += 1;
            }
        }

        self.commit(&mut state, &cache, ops)?;
        info!(tenant = %self.tenant, job_id = id, dropped, "job deleted");
        Ok(())
    }

    // ─── Match results ──────────────────────────────────────

    /// Store a match result; an id of `0` allocates a new one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `job_id` names an unknown job.
    pub async fn save_match_result(&self, mut result: MatchResult) -> Result<MatchResult> {
        let mut state = self.state.write().await;
        let (cache, repos) = state.handles()?;
        if !self.exists(&cache, &repos, Keyspace::Job, result.job_id).await? {
            return Err(not_found::<Job>(result.job_id));
        }

        let mut ops = Vec::new();
        let allocated = self.assign_id(&mut result.id, &mut ops)?;
        stamp_created(&mut result.created_at, allocated, Utc::now());

        self.put_entity(Keyspace::MatchResult, &result, &mut ops)?;
        ops.push(self.invalidate(Keyspace::MatchHistory));
        self.commit(&mut state, &cache, ops)?;
        debug!(tenant = %self.tenant, match_id = result.id, job_id = result.job_id, "match result saved");
        Ok(result)
    }

    /// Fetch one match result.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the result or its job does not exist.
    pub async fn get_match_result(&self, id: i64) -> Result<MatchResult> {
        let state = self.state.read().await;
        let (cache, repos) = state.handles()?;
        let key = CacheKey::entity(Keyspace::MatchResult, &self.tenant, id);
        if let Some(result) = cache.get_json(&key)? {
            return Ok(result);
        }
        if cache.contains(&CacheKey::tombstone(Keyspace::MatchResult, &self.tenant, id))? {
            return Err(not_found::<MatchResult>(id));
        }

        let result = repos
            .matches
            .get(id)
            .await?
            .ok_or_else(|| not_found::<MatchResult>(id))?;
        if cache.contains(&CacheKey::tombstone(Keyspace::Job, &self.tenant, result.job_id))? {
            return Err(not_found::<MatchResult>(id));
        }
        self.repair(&cache, &key, &result);
        Ok(result)
    }

    /// The `limit` most recent match results, newest first.
    ///
    /// # Errors
    ///
    /// Returns a cache, codec or relational error.
    pub async fn get_match_history(&self, limit: u32) -> Result<Vec<MatchResult>> {
        let state = self.state.read().await;
        let (cache, repos) = state.handles()?;
        let qualifier = format!("limit={limit}");
        let key = CacheKey::list(Keyspace::MatchHistory, &self.tenant, Some(&qualifier));
        if let Some(view) = cache.get_json(&key)? {
            return Ok(view);
        }

        let tombstones = tombstones(&cache, &self.tenant)?;
        let mut history = merge_views(
            repos.matches.list_recent(limit).await?,
            cached_entities(&cache, Keyspace::MatchResult, &self.tenant)?,
            Keyspace::MatchResult,
            &tombstones,
        );
        history.retain(|result| !tombstones.contains(&(Keyspace::Job, result.job_id)));
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        history.truncate(usize::try_from(limit).unwrap_or(usize::MAX));

        self.repair(&cache, &key, &history);
        Ok(history)
    }

    // ─── Lifecycle ──────────────────────────────────────────

    /// Stop the sync ticker, flush once more, and release both tiers.
    ///
    /// Safe to call repeatedly; only the first call does any work. Every
    /// later operation fails with `AppError::Closed`.
    ///
    /// # Errors
    ///
    /// Returns the final sync's error if it failed; the handles are
    /// released regardless.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.cancel.cancel();
        if let Some(handle) = self.sync_task.lock().await.take() {
            if let Err(err) = handle.await {
                warn!(tenant = %self.tenant, %err, "sync task ended abnormally");
            }
        }

        let mut errors = Vec::new();
        let mut state = self.state.write().await;
        if let Err(err) = self.sync_locked(&mut state, &CancellationToken::new()).await {
            warn!(tenant = %self.tenant, %err, "final sync before close failed");
            errors.push(err);
        }
        if let Some(repos) = state.repos.take() {
            repos.db.close().await;
        }
        state.cache = None;
        drop(state);

        self.released.cancel();
        info!(tenant = %self.tenant, "tenant storage closed");
        AppError::collect(errors)
    }

    /// Whether the background sync ticker is still running.
    pub async fn has_sync_task(&self) -> bool {
        self.sync_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Resolves once a closed instance has released its files.
    pub(crate) async fn wait_released(&self) {
        self.released.cancelled().await;
    }

    // ─── Write helpers ──────────────────────────────────────

    /// Allocate an id for a record that has none; returns whether one was assigned.
    fn assign_id(&self, id: &mut i64, ops: &mut Vec<CacheOp>) -> Result<bool> {
        if *id > 0 {
            // Caller-chosen ids still advance the allocator.
            if self.ids.observe(*id) {
                ops.push(CacheOp::Put(
                    CacheKey::meta(&self.tenant, NEXT_ID_MARKER),
                    serde_json::to_vec(&self.ids.high_water())?,
                ));
            }
            return Ok(false);
        }
        *id = self.ids.allocate();
        ops.push(CacheOp::Put(
            CacheKey::meta(&self.tenant, NEXT_ID_MARKER),
            serde_json::to_vec(id)?,
        ));
        Ok(true)
    }

    fn put_entity<T: Record>(&self, space: Keyspace, record: &T, ops: &mut Vec<CacheOp>) -> Result<()> {
        ops.push(CacheOp::Put(
            CacheKey::entity(space, &self.tenant, record.id()),
            serde_json::to_vec(record)?,
        ));
        ops.push(CacheOp::Remove(CacheKey::tombstone(space, &self.tenant, record.id())));
        Ok(())
    }

    fn invalidate(&self, space: Keyspace) -> CacheOp {
        CacheOp::RemovePrefix(CacheKey::family_prefix(space, &self.tenant))
    }

    /// Apply a write batch together with the dirty marker.
    fn commit(&self, state: &mut StorageState, cache: &CacheStore, mut ops: Vec<CacheOp>) -> Result<()> {
        ops.push(CacheOp::Put(CacheKey::meta(&self.tenant, DIRTY_MARKER), vec![1]));
        cache.apply(ops)?;
        state.dirty = true;
        Ok(())
    }

    async fn exists(
        &self,
        cache: &CacheStore,
        repos: &Repositories,
        space: Keyspace,
        id: i64,
    ) -> Result<bool> {
        if cache.contains(&CacheKey::entity(space, &self.tenant, id))? {
            return Ok(true);
        }
        if cache.contains(&CacheKey::tombstone(space, &self.tenant, id))? {
            return Ok(false);
        }
        Ok(match space {
            Keyspace::Company => repos.companies.get(id).await?.is_some(),
            Keyspace::Job => repos.jobs.get(id).await?.is_some(),
            Keyspace::MatchResult => repos.matches.get(id).await?.is_some(),
            _ => false,
        })
    }

    /// Best-effort cache write on the read path.
    fn repair<T: Serialize>(&self, cache: &CacheStore, key: &CacheKey, value: &T) {
        if let Err(err) = cache.put_json(key, value) {
            warn!(tenant = %self.tenant, %key, %err, "cache repair failed");
        }
    }
}

impl Drop for UserStorage {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn init_error(err: AppError) -> AppError {
    match err {
        AppError::Init(_) => err,
        other => AppError::Init(other.to_string()),
    }
}

fn not_found<T: Record>(id: i64) -> AppError {
    AppError::NotFound(format!("{} {id}", T::KIND))
}

fn is_unset(ts: DateTime<Utc>) -> bool {
    ts.timestamp() == 0 && ts.timestamp_subsec_nanos() == 0
}

fn stamp_created(created_at: &mut DateTime<Utc>, allocated: bool, now: DateTime<Utc>) {
    if allocated || is_unset(*created_at) {
        *created_at = now;
    }
}

/// Every tombstoned entity of `tenant`.
pub(crate) fn tombstones(cache: &CacheStore, tenant: &str) -> Result<Tombstones> {
    Ok(cache
        .keys_with_prefix(&CacheKey::family_prefix(Keyspace::Tombstone, tenant))?
        .iter()
        .filter_map(|key| keys::parse_tombstone(key, tenant))
        .collect())
}

/// Decode every cached entity of one keyspace.
pub(crate) fn cached_entities<T: Record>(
    cache: &CacheStore,
    space: Keyspace,
    tenant: &str,
) -> Result<Vec<T>> {
    cache
        .scan_prefix(&CacheKey::family_prefix(space, tenant))?
        .into_iter()
        .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(Into::into))
        .collect()
}

/// Overlay cached records on relational rows; tombstoned rows are dropped.
fn merge_views<T: Record>(rows: Vec<T>, cached: Vec<T>, space: Keyspace, tombstones: &Tombstones) -> Vec<T> {
    let mut merged: BTreeMap<i64, T> = rows
        .into_iter()
        .filter(|row| !tombstones.contains(&(space, row.id())))
        .map(|row| (row.id(), row))
        .collect();
    for record in cached {
        merged.insert(record.id(), record);
    }
    merged.into_values().collect()
}

fn detach_deleted_company(job: &mut Job, tombstones: &Tombstones) {
    if job
        .company_id
        .is_some_and(|id| tombstones.contains(&(Keyspace::Company, id)))
    {
        job.company_id = None;
    }
}

/// Largest id in use anywhere in either tier.
async fn high_water_mark(cache: &CacheStore, repos: &Repositories, tenant: &str) -> Result<i64> {
    let mut high = repos.max_id().await?;
    if let Some(persisted) = cache.get_json::<i64>(&CacheKey::meta(tenant, NEXT_ID_MARKER))? {
        high = high.max(persisted);
    }
    if let Some(profile) = cache.get_json::<Profile>(&CacheKey::singleton(Keyspace::Profile, tenant))? {
        high = high.max(profile.id);
    }
    for space in [Keyspace::Company, Keyspace::Job, Keyspace::MatchResult] {
        let prefix = CacheKey::family_prefix(space, tenant);
        for key in cache.keys_with_prefix(&prefix)? {
            if let Some(id) = keys::id_from_key(&key, &prefix) {
                high = high.max(id);
            }
        }
    }
    for (_, id) in tombstones(cache, tenant)? {
        high = high.max(id);
    }
    Ok(high)
}

/// Make sure the tenant row and its profile exist relationally.
async fn seed_profile(
    cache: &CacheStore,
    repos: &Repositories,
    ids: &IdAllocator,
    tenant: &str,
) -> Result<()> {
    repos.profiles.ensure_tenant(tenant).await?;
    if repos.profiles.get(tenant).await?.is_some() {
        return Ok(());
    }

    let key = CacheKey::singleton(Keyspace::Profile, tenant);
    let profile = if let Some(cached) = cache.get_json::<Profile>(&key)? {
        cached
    } else {
        let id = ids.allocate();
        let profile = Profile::empty(id, tenant);
        cache.apply(vec![
            CacheOp::Put(key, serde_json::to_vec(&profile)?),
            CacheOp::Put(CacheKey::meta(tenant, NEXT_ID_MARKER), serde_json::to_vec(&id)?),
        ])?;
        profile
    };
    repos.profiles.upsert(&profile).await?;
    debug!(profile_id = profile.id, "seeded tenant profile");
    Ok(())
}

/// Copy relational records the cache does not hold yet; returns how many.
async fn warm_cache(cache: &CacheStore, repos: &Repositories, tenant: &str) -> Result<usize> {
    let tombstones = tombstones(cache, tenant)?;
    let mut ops = Vec::new();

    if let Some(profile) = repos.profiles.get(tenant).await? {
        queue_missing(cache, &mut ops, CacheKey::singleton(Keyspace::Profile, tenant), &profile)?;
    }
    for company in repos.companies.list().await? {
        if !tombstones.contains(&(Keyspace::Company, company.id)) {
            let key = CacheKey::entity(Keyspace::Company, tenant, company.id);
            queue_missing(cache, &mut ops, key, &company)?;
        }
    }
    for mut job in repos.jobs.list(None).await? {
        if !tombstones.contains(&(Keyspace::Job, job.id)) {
            detach_deleted_company(&mut job, &tombstones);
            let key = CacheKey::entity(Keyspace::Job, tenant, job.id);
            queue_missing(cache, &mut ops, key, &job)?;
        }
    }
    for result in repos.matches.list_all().await? {
        if !tombstones.contains(&(Keyspace::MatchResult, result.id))
            && !tombstones.contains(&(Keyspace::Job, result.job_id))
        {
            let key = CacheKey::entity(Keyspace::MatchResult, tenant, result.id);
            queue_missing(cache, &mut ops, key, &result)?;
        }
    }

    let warmed = ops.len();
    if warmed > 0 {
        cache.apply(ops)?;
    }
    Ok(warmed)
}

fn queue_missing<T: Serialize>(
    cache: &CacheStore,
    ops: &mut Vec<CacheOp>,
    key: CacheKey,
    value: &T,
) -> Result<()> {
    if !cache.contains(&key)? {
        ops.push(CacheOp::Put(key, serde_json::to_vec(value)?));
    }
    Ok(())
}

/// Install the tenant's remote snapshot as the local relational file.
async fn restore_from_backup(
    provider: &dyn CloudBackupProvider,
    tenant: &str,
    db_path: &Path,
) -> Result<()> {
    let downloaded = provider
        .download(tenant)
        .await
        .map_err(|err| AppError::Init(format!("backup download failed: {err}")))?;
    let Some(downloaded) = downloaded else {
        debug!("no remote snapshot; starting from local state");
        return Ok(());
    };

    let installed = install_snapshot(&downloaded, db_path).await;
    if let Err(err) = tokio::fs::remove_file(&downloaded).await {
        warn!(%err, path = %downloaded.display(), "failed to remove downloaded snapshot");
    }
    installed.map_err(|err| AppError::Init(format!("failed to install remote snapshot: {err}")))?;

    info!("restored relational file from remote snapshot");
    Ok(())
}

async fn install_snapshot(source: &Path, db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    for suffix in ["-wal", "-shm"] {
        match tokio::fs::remove_file(sibling(db_path, suffix)).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    tokio::fs::copy(source, db_path).await?;
    Ok(())
}

/// `path` with `suffix` appended to its file name (`store.db` → `store.db-wal`).
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
