//! Storage configuration parsing, validation, and on-disk path layout.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// File name of the relational database inside a tenant directory.
pub const DB_FILE_NAME: &str = "store.db";

/// Name of the cache subdirectory inside a tenant directory.
pub const CACHE_DIR_NAME: &str = "cache";

/// Off-box backup settings for hosted deployments.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BackupConfig {
    /// Whether relational snapshots are restored from and uploaded to the backup store.
    #[serde(default)]
    pub enabled: bool,
    /// Root directory of the filesystem backup store.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

fn default_sync_interval() -> u64 {
    30
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_max_connections() -> u32 {
    4
}

fn default_idle_timeout() -> u64 {
    1800
}

fn default_cleanup_interval() -> u64 {
    300
}

/// Storage configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StorageConfig {
    /// Shared base directory holding one subdirectory per tenant.
    pub base_path: PathBuf,
    /// Seconds between background flushes of dirty cache state.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_seconds: u64,
    /// `SQLite` busy timeout applied to every connection.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Upper bound of the per-tenant relational connection pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Disable the background sync ticker (tests, one-shot tooling).
    #[serde(default)]
    pub ephemeral: bool,
    /// Idle time after which a tenant is eligible for eviction.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
    /// Seconds between idle-eviction sweeps.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// Off-box backup settings.
    #[serde(default)]
    pub backup: BackupConfig,
}

impl StorageConfig {
    /// Build a configuration rooted at `base_path` with default settings.
    #[must_use]
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            sync_interval_seconds: default_sync_interval(),
            busy_timeout_ms: default_busy_timeout_ms(),
            max_connections: default_max_connections(),
            ephemeral: false,
            idle_timeout_seconds: default_idle_timeout(),
            cleanup_interval_seconds: default_cleanup_interval(),
            backup: BackupConfig::default(),
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field ranges and cross-field requirements.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.base_path.as_os_str().is_empty() {
            return Err(AppError::Config("base_path must not be empty".into()));
        }
        if self.sync_interval_seconds == 0 {
            return Err(AppError::Config(
                "sync_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(AppError::Config(
                "max_connections must be greater than zero".into(),
            ));
        }
        if self.cleanup_interval_seconds == 0 {
            return Err(AppError::Config(
                "cleanup_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.backup.enabled && self.backup.root.is_none() {
            return Err(AppError::Config(
                "backup.root is required when backup is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Background flush interval.
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_seconds)
    }

    /// Busy timeout for relational connections.
    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Idle duration used by the eviction sweep.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// Interval between eviction sweeps.
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    /// Directory holding all files for `tenant`.
    #[must_use]
    pub fn tenant_dir(&self, tenant: &str) -> PathBuf {
        self.base_path.join(tenant_dir_name(tenant))
    }

    /// Cache subdirectory for `tenant`.
    #[must_use]
    pub fn cache_dir(&self, tenant: &str) -> PathBuf {
        self.tenant_dir(tenant).join(CACHE_DIR_NAME)
    }

    /// Relational database file for `tenant`.
    #[must_use]
    pub fn db_path(&self, tenant: &str) -> PathBuf {
        self.tenant_dir(tenant).join(DB_FILE_NAME)
    }
}

/// Map a tenant id onto a single filesystem-safe path component.
///
/// ASCII alphanumerics, `-`, `_` and `@` pass through; every other byte is
/// written as `%XX`. The mapping is injective, so distinct tenants never
/// share a directory, and `.`/`..` can never be produced.
#[must_use]
pub fn tenant_dir_name(tenant: &str) -> String {
    let mut out = String::with_capacity(tenant.len());
    for byte in tenant.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'@') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
