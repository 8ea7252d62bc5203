//! Process-wide registry of open indexes (§4.12).
//!
//! Thread-safe map of index name to a lazily-opened, independently-lockable
//! `Index`, mirroring the teacher's `DatabaseManager` / `Database` pattern:
//! a `RwLock<HashMap<..>>` of `Arc`-wrapped units, validated names, and a
//! quiesce-then-remove delete path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tracing::info;

use crate::config::Config;
use crate::error::{IndexError, Result};
use crate::metrics::Metrics;
use crate::storage::index::Index;
use crate::storage::segment_set::MergePolicyConfig;

/// Registry - manages every open index for this process.
///
/// Indexes are opened lazily on first access and kept cached until deleted.
pub struct Registry {
    indexes: RwLock<HashMap<String, Arc<Index>>>,
    data_dir: PathBuf,
    checkpoint_bytes_threshold: usize,
    merge_policy: MergePolicyConfig,
    parallel_load_threshold: usize,
    metrics: Arc<Metrics>,
}

impl Registry {
    pub fn new(config: &Config, metrics: Arc<Metrics>) -> Self {
        Self {
            indexes: RwLock::new(HashMap::new()),
            data_dir: config.data_dir.clone(),
            checkpoint_bytes_threshold: config.checkpoint_bytes_threshold,
            merge_policy: MergePolicyConfig { ratio: config.merge_ratio, fan_in: config.merge_fan_in },
            parallel_load_threshold: config.parallel_load_threshold,
            metrics,
        }
    }

    /// Validate an index name (§6.1 grammar): first char `[A-Za-z0-9]`,
    /// subsequent chars `[A-Za-z0-9_-]`.
    fn validate_name(name: &str) -> Result<()> {
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return Err(IndexError::BadIndexName("name must not be empty".into()));
        };
        if !first.is_ascii_alphanumeric() {
            return Err(IndexError::BadIndexName("first character must be alphanumeric".into()));
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(IndexError::BadIndexName(
                "characters after the first must be [A-Za-z0-9_-]".into(),
            ));
        }
        Ok(())
    }

    /// Create a new index directory and register it. Fails with
    /// `IndexAlreadyExists` if the name is already known to this process
    /// or an index directory already exists on disk.
    pub fn create(&self, name: &str) -> Result<()> {
        Self::validate_name(name)?;

        let mut indexes = self.indexes.write().unwrap();
        if indexes.contains_key(name) {
            return Err(IndexError::IndexAlreadyExists(name.to_string()));
        }

        let dir = self.data_dir.join(name);
        if dir.exists() {
            return Err(IndexError::IndexAlreadyExists(name.to_string()));
        }

        Index::create(&dir)?;
        let index = Arc::new(Index::open(
            &dir,
            self.checkpoint_bytes_threshold,
            self.merge_policy,
            self.parallel_load_threshold,
            self.metrics.clone(),
        )?);
        indexes.insert(name.to_string(), index);
        Ok(())
    }

    /// Get a cached handle, or open the index directory on disk if this is
    /// the first access this process has made to it (crash recovery per
    /// the index lifecycle's Open path).
    pub fn open_or_get(&self, name: &str) -> Result<Arc<Index>> {
        if let Some(index) = self.indexes.read().unwrap().get(name) {
            return Ok(index.clone());
        }

        Self::validate_name(name)?;
        let dir = self.data_dir.join(name);
        if !dir.exists() {
            return Err(IndexError::IndexNotFound(name.to_string()));
        }

        let mut indexes = self.indexes.write().unwrap();
        // Another thread may have opened it while we were waiting for the
        // write lock.
        if let Some(index) = indexes.get(name) {
            return Ok(index.clone());
        }

        let index = Arc::new(Index::open(
            &dir,
            self.checkpoint_bytes_threshold,
            self.merge_policy,
            self.parallel_load_threshold,
            self.metrics.clone(),
        )?);
        indexes.insert(name.to_string(), index.clone());
        Ok(index)
    }

    /// Check if an index is known without opening it from disk.
    pub fn exists(&self, name: &str) -> bool {
        if self.indexes.read().unwrap().contains_key(name) {
            return true;
        }
        self.data_dir.join(name).exists()
    }

    /// Delete an index: quiesce by dropping our `Arc`, then remove its
    /// directory. Any request already holding a clone of the `Arc` runs
    /// to completion against the now-unregistered index.
    pub fn delete(&self, name: &str) -> Result<()> {
        let mut indexes = self.indexes.write().unwrap();
        let index = match indexes.remove(name) {
            Some(index) => index,
            None => {
                let dir = self.data_dir.join(name);
                if !dir.exists() {
                    return Err(IndexError::IndexNotFound(name.to_string()));
                }
                Arc::new(Index::open(
                    &dir,
                    self.checkpoint_bytes_threshold,
                    self.merge_policy,
                    self.parallel_load_threshold,
                    self.metrics.clone(),
                )?)
            }
        };
        drop(indexes);

        index.delete(&self.data_dir, name)?;
        info!(index = name, "deleted index");
        Ok(())
    }

    /// List every index name known to this process (ambient introspection
    /// for `/_health`). Does not scan the data directory for indexes this
    /// process has never opened.
    pub fn list(&self) -> Vec<String> {
        self.indexes.read().unwrap().keys().cloned().collect()
    }
}
