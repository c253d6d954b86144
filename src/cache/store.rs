//! `redb`-backed key-value store for one tenant's cache.
//!
//! All mutations go through [`CacheStore::apply`], which commits a batch of
//! operations in a single write transaction: readers observe either none or
//! all of a batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Result;

use super::keys::CacheKey;

/// File name of the cache database inside the cache directory.
pub const CACHE_FILE_NAME: &str = "cache.redb";

const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

/// One mutation inside an atomic cache batch.
#[derive(Debug, Clone)]
pub enum CacheOp {
    /// Insert or replace a value.
    Put(CacheKey, Vec<u8>),
    /// Remove a single key if present.
    Remove(CacheKey),
    /// Remove every key starting with the prefix.
    RemovePrefix(String),
}

/// Handle to an open cache database. Clones share the same file handle.
#[derive(Clone)]
pub struct CacheStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl CacheStore {
    /// Open (or create) the cache database inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory cannot be created, or
    /// `AppError::Cache` if the database cannot be opened.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(CACHE_FILE_NAME);
        let db = Database::create(&path)?;

        // Create the table eagerly so later read transactions don't fail.
        let txn = db.begin_write()?;
        {
            let _table = txn.open_table(ENTRIES)?;
        }
        txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    /// Location of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the raw value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cache` if the read transaction fails.
    pub fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        Ok(table.get(key.as_str())?.map(|value| value.value().to_vec()))
    }

    /// Whether a value is stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cache` if the read transaction fails.
    pub fn contains(&self, key: &CacheKey) -> Result<bool> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        Ok(table.get(key.as_str())?.is_some())
    }

    /// Read and decode the JSON value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cache` on read failure or `AppError::Codec` if the
    /// stored bytes do not decode as `T`.
    pub fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        self.get(key)?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(Into::into))
            .transpose()
    }

    /// Encode `value` as JSON and store it under `key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Codec` if encoding fails or `AppError::Cache` if the
    /// write fails.
    pub fn put_json<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<()> {
        self.put(key, &serde_json::to_vec(value)?)
    }

    /// Store raw bytes under `key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cache` if the write fails.
    pub fn put(&self, key: &CacheKey, value: &[u8]) -> Result<()> {
        self.apply(vec![CacheOp::Put(key.clone(), value.to_vec())])
            .map(|_| ())
    }

    /// Remove `key`; returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cache` if the write fails.
    pub fn remove(&self, key: &CacheKey) -> Result<bool> {
        self.apply(vec![CacheOp::Remove(key.clone())])
            .map(|removed| removed > 0)
    }

    /// Remove every key starting with `prefix`; returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cache` if the write fails.
    pub fn remove_prefix(&self, prefix: &str) -> Result<u64> {
        self.apply(vec![CacheOp::RemovePrefix(prefix.to_owned())])
    }

    /// Commit a batch of operations in one write transaction.
    ///
    /// Returns the number of keys removed by `Remove` and `RemovePrefix`
    /// operations.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cache` if any operation or the commit fails; in
    /// that case none of the batch is applied.
    pub fn apply(&self, ops: Vec<CacheOp>) -> Result<u64> {
        let txn = self.db.begin_write()?;
        let mut removed = 0u64;
        {
            let mut table = txn.open_table(ENTRIES)?;
            for op in ops {
                match op {
                    CacheOp::Put(key, value) => {
                        table.insert(key.as_str(), value.as_slice())?;
                    }
                    CacheOp::Remove(key) => {
                        if table.remove(key.as_str())?.is_some() {
                            removed += 1;
                        }
                    }
                    CacheOp::RemovePrefix(prefix) => {
                        let keys = {
                            let mut keys = Vec::new();
                            for entry in table.range::<&str>(prefix.as_str()..)? {
                                let (key, _) = entry?;
                                let key = key.value();
                                if !key.starts_with(prefix.as_str()) {
                                    break;
                                }
                                keys.push(key.to_owned());
                            }
                            keys
                        };
                        for key in &keys {
                            if table.remove(key.as_str())?.is_some() {
                                removed += 1;
                            }
                        }
                    }
                }
            }
        }
        txn.commit()?;
        Ok(removed)
    }

    /// Collect every `(key, value)` pair whose key starts with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cache` if the read transaction fails.
    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        let mut entries = Vec::new();
        for entry in table.range::<&str>(prefix..)? {
            let (key, value) = entry?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_owned(), value.value().to_vec()));
        }
        Ok(entries)
    }

    /// Collect every key starting with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cache` if the read transaction fails.
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// Total number of stored entries.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cache` if the read transaction fails.
    pub fn len(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        Ok(table.len()?)
    }

    /// Whether the cache holds no entries.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cache` if the read transaction fails.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
