#![forbid(unsafe_code)]

//! Per-tenant dual-tier persistence for job-tracking data.
//!
//! Every tenant gets an embedded write-through cache in front of a durable
//! `SQLite` file. Writes land in the cache and are flushed relationally by a
//! background ticker; hosted deployments additionally restore the relational
//! file from, and upload it to, an off-box backup store.

pub mod backup;
pub mod cache;
pub mod config;
pub mod errors;
pub mod models;
pub mod persistence;
pub mod storage;

pub use config::StorageConfig;
pub use errors::{AppError, Result};
pub use storage::{StorageProvider, SyncReport, UserStorage};
