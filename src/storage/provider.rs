//! Process-wide registry of open tenant storages.
//!
//! Each tenant maps to a once-cell, so opening one tenant only blocks other
//! callers asking for that same tenant. A failed open leaves the cell empty
//! and the next caller simply retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{OnceCell, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::backup::{CloudBackupProvider, FsBackupProvider};
use crate::config::StorageConfig;
use crate::{AppError, Result};

use super::user_storage::UserStorage;

type Slot = Arc<OnceCell<Arc<UserStorage>>>;

/// Registry handing out one [`UserStorage`] per tenant.
pub struct StorageProvider {
    config: Arc<StorageConfig>,
    backup: Option<Arc<dyn CloudBackupProvider>>,
    instances: RwLock<HashMap<String, Slot>>,
}

impl StorageProvider {
    /// Build a provider from configuration, wiring the filesystem backup
    /// store when `backup.enabled` is set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the configuration is invalid.
    pub fn new(config: StorageConfig) -> Result<Self> {
        let backup: Option<Arc<dyn CloudBackupProvider>> = match &config.backup.root {
            Some(root) if config.backup.enabled => Some(Arc::new(FsBackupProvider::new(root.clone()))),
            _ => None,
        };
        Self::with_backup(config, backup)
    }

    /// Build a provider with an explicit backup provider. Supplying one puts
    /// every tenant in hosted mode.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the configuration is invalid.
    pub fn with_backup(
        config: StorageConfig,
        backup: Option<Arc<dyn CloudBackupProvider>>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            backup,
            instances: RwLock::new(HashMap::new()),
        })
    }

    /// Configuration shared by every tenant.
    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Backup provider, if hosted mode is enabled.
    #[must_use]
    pub fn backup(&self) -> Option<&Arc<dyn CloudBackupProvider>> {
        self.backup.as_ref()
    }

    /// Return the tenant's storage, opening it on first use.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an empty tenant id, or the error that
    /// prevented the storage from opening.
    pub async fn get_storage(&self, tenant: &str) -> Result<Arc<UserStorage>> {
        if tenant.is_empty() {
            return Err(AppError::Config("tenant id must not be empty".into()));
        }

        loop {
            let slot = self.slot(tenant).await;
            let storage = slot
                .get_or_try_init(|| {
                    UserStorage::open(tenant, Arc::clone(&self.config), self.backup.clone())
                })
                .await
                .map(Arc::clone)?;
            if !storage.is_closed() {
                return Ok(storage);
            }

            // Evicted concurrently: wait for its files to be released, then reopen.
            storage.wait_released().await;
            self.discard(tenant, &slot).await;
        }
    }

    /// Close every open tenant.
    ///
    /// # Errors
    ///
    /// Returns the collected close failures; every tenant is attempted.
    pub async fn close_all(&self) -> Result<()> {
        let mut errors = Vec::new();
        let mut closed = 0usize;
        for (tenant, slot) in self.snapshot().await {
            let Some(storage) = slot.get() else {
                continue;
            };
            if let Err(err) = storage.close().await {
                error!(tenant = %tenant, %err, "failed to close tenant storage");
                errors.push(err);
            }
            self.discard(&tenant, &slot).await;
            closed += 1;
        }
        info!(closed, "closed all tenant storages");
        AppError::collect(errors)
    }

    /// Close and evict every tenant whose last sync is older than `idle`.
    ///
    /// Returns the evicted tenants, sorted. A failed final sync is logged;
    /// the unflushed changes stay in the tenant's cache for the next open.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `idle` is out of range.
    pub async fn cleanup_inactive(&self, idle: Duration) -> Result<Vec<String>> {
        let idle = chrono::Duration::from_std(idle)
            .map_err(|err| AppError::Config(format!("invalid idle duration: {err}")))?;
        let Some(cutoff) = Utc::now().checked_sub_signed(idle) else {
            return Ok(Vec::new());
        };

        let mut evicted = Vec::new();
        for (tenant, slot) in self.snapshot().await {
            let Some(storage) = slot.get() else {
                continue;
            };
            if storage.last_sync_time().await >= cutoff {
                continue;
            }
            if let Err(err) = storage.close().await {
                warn!(tenant = %tenant, %err, "final sync failed while evicting idle tenant");
            }
            self.discard(&tenant, &slot).await;
            evicted.push(tenant);
        }

        evicted.sort();
        if !evicted.is_empty() {
            info!(count = evicted.len(), "evicted idle tenants");
        }
        Ok(evicted)
    }

    /// Tenants with an open storage, sorted.
    pub async fn active_users(&self) -> Vec<String> {
        let instances = self.instances.read().await;
        let mut tenants: Vec<String> = instances
            .iter()
            .filter(|(_, slot)| slot.get().is_some_and(|storage| !storage.is_closed()))
            .map(|(tenant, _)| tenant.clone())
            .collect();
        tenants.sort();
        tenants
    }

    async fn slot(&self, tenant: &str) -> Slot {
        if let Some(slot) = self.instances.read().await.get(tenant) {
            return Arc::clone(slot);
        }
        let mut instances = self.instances.write().await;
        Arc::clone(instances.entry(tenant.to_owned()).or_default())
    }

    /// Remove `slot` from the registry unless it has already been replaced.
    async fn discard(&self, tenant: &str, slot: &Slot) {
        let mut instances = self.instances.write().await;
        if instances
            .get(tenant)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            instances.remove(tenant);
        }
    }

    async fn snapshot(&self) -> Vec<(String, Slot)> {
        self.instances
            .read()
            .await
            .iter()
            .map(|(tenant, slot)| (tenant.clone(), Arc::clone(slot)))
            .collect()
    }
}

/// Spawn the idle-eviction sweep.
///
/// Every `every`, tenants idle for longer than `idle` are closed and evicted.
/// Runs until `cancel` fires.
#[must_use]
pub fn spawn_cleanup_task(
    provider: Arc<StorageProvider>,
    idle: Duration,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("cleanup task shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(err) = provider.cleanup_inactive(idle).await {
                            error!(%err, "idle cleanup failed");
                        }
                    }
                }
            }
        }
        .instrument(info_span!("cleanup_task")),
    )
}
