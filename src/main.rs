#![forbid(unsafe_code)]

//! `jobtrack-store`: operator CLI for tenant storage.
//!
//! Runs the storage service (idle eviction plus background sync) or
//! performs one-shot maintenance against a single tenant's files.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use jobtrack_store::storage::spawn_cleanup_task;
use jobtrack_store::{AppError, Result, StorageConfig, StorageProvider};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "jobtrack-store", about = "Per-tenant storage maintenance", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Keep tenants open on demand, evicting idle ones, until interrupted.
    Serve {
        /// Tenants to open at startup.
        tenants: Vec<String>,
    },

    /// Flush each tenant's cache into its relational file.
    Sync {
        /// Tenant ids.
        #[arg(required = true)]
        tenants: Vec<String>,
    },

    /// Print record counts and sync state for a tenant.
    Stats {
        /// Tenant id.
        tenant: String,
    },

    /// Show when the tenant's remote snapshot was last written.
    BackupStatus {
        /// Tenant id.
        tenant: String,
    },

    /// Remove the tenant's remote snapshot.
    DeleteBackup {
        /// Tenant id.
        tenant: String,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

/// Commands that open tenants, act once and exit.
#[derive(Debug)]
enum OneShot {
    Sync(Vec<String>),
    Stats(String),
    BackupStatus(String),
    DeleteBackup(String),
}

async fn run(args: Cli) -> Result<()> {
    let config = StorageConfig::load_from_path(&args.config)?;
    info!(base_path = %config.base_path.display(), "configuration loaded");

    let one_shot = match args.command {
        Command::Serve { tenants } => return serve(config, tenants).await,
        Command::Sync { tenants } => OneShot::Sync(tenants),
        Command::Stats { tenant } => OneShot::Stats(tenant),
        Command::BackupStatus { tenant } => OneShot::BackupStatus(tenant),
        Command::DeleteBackup { tenant } => OneShot::DeleteBackup(tenant),
    };
    run_once(config, one_shot).await
}

async fn run_once(mut config: StorageConfig, command: OneShot) -> Result<()> {
    // One-shot commands flush explicitly; no ticker needed.
    config.ephemeral = true;
    let provider = StorageProvider::new(config)?;

    let outcome = match command {
        OneShot::Sync(tenants) => sync_tenants(&provider, &tenants).await,
        OneShot::Stats(tenant) => print_stats(&provider, &tenant).await,
        OneShot::BackupStatus(tenant) => backup_status(&provider, &tenant).await,
        OneShot::DeleteBackup(tenant) => delete_backup(&provider, &tenant).await,
    };

    let closed = provider.close_all().await;
    outcome.and(closed)
}

async fn serve(config: StorageConfig, tenants: Vec<String>) -> Result<()> {
    let idle = config.idle_timeout();
    let every = config.cleanup_interval();
    let provider = Arc::new(StorageProvider::new(config)?);

    for tenant in &tenants {
        provider.get_storage(tenant).await?;
    }
    info!(tenants = tenants.len(), "storage service ready");

    let ct = CancellationToken::new();
    let cleanup_handle = spawn_cleanup_task(Arc::clone(&provider), idle, every, ct.clone());

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();
    if let Err(err) = cleanup_handle.await {
        error!(%err, "cleanup task ended abnormally");
    }

    provider.close_all().await?;
    info!("jobtrack-store shut down");
    Ok(())
}

async fn sync_tenants(provider: &StorageProvider, tenants: &[String]) -> Result<()> {
    let cancel = CancellationToken::new();
    let mut errors = Vec::new();
    for tenant in tenants {
        let outcome = match provider.get_storage(tenant).await {
            Ok(storage) => storage.sync(&cancel).await,
            Err(err) => Err(err),
        };
        match outcome {
            Ok(report) if report.skipped => println!("{tenant}: clean, nothing to sync"),
            Ok(report) => println!(
                "{tenant}: upserted {} deleted {} backed up {}",
                report.upserted, report.deleted, report.backed_up
            ),
            Err(err) => {
                error!(tenant = %tenant, %err, "sync failed");
                errors.push(err);
            }
        }
    }
    AppError::collect(errors)
}

async fn print_stats(provider: &StorageProvider, tenant: &str) -> Result<()> {
    let storage = provider.get_storage(tenant).await?;
    let companies = storage.list_companies().await?.len();
    let jobs = storage.list_jobs(None).await?.len();
    let cache_entries = storage.cache().await?.len()?;

    println!("tenant:        {tenant}");
    println!("companies:     {companies}");
    println!("jobs:          {jobs}");
    println!("cache entries: {cache_entries}");
    println!("dirty:         {}", storage.is_dirty().await);
    println!("last sync:     {}", storage.last_sync_time().await.to_rfc3339());
    Ok(())
}

async fn backup_status(provider: &StorageProvider, tenant: &str) -> Result<()> {
    let Some(backup) = provider.backup() else {
        return Err(AppError::Config("backup is not enabled".into()));
    };
    match backup.get_last_modified(tenant).await? {
        Some(modified) => println!("{tenant}: remote snapshot written {}", modified.to_rfc3339()),
        None => println!("{tenant}: no remote snapshot"),
    }
    Ok(())
}

async fn delete_backup(provider: &StorageProvider, tenant: &str) -> Result<()> {
    let Some(backup) = provider.backup() else {
        return Err(AppError::Config("backup is not enabled".into()));
    };
    backup.delete(tenant).await?;
    info!(tenant, "remote snapshot deleted");
    println!("{tenant}: remote snapshot deleted");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
