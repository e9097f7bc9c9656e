//! Process-wide cache of built indexes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{SimilarityError, SimilarityResult};
use crate::index::{persist, ApproximateIndex, IndexConfig};

/// Loads each persisted index at most once and shares it between readers.
#[derive(Debug)]
pub struct IndexRegistry {
    dir: PathBuf,
    loaded: RwLock<HashMap<IndexConfig, Arc<ApproximateIndex>>>,
}

impl IndexRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The index for `config`, loading it from disk on first use.
    ///
    /// Fails with [`SimilarityError::IndexNotAvailable`] when no artifact
    /// exists for `config`.
    pub fn get(&self, config: &IndexConfig) -> SimilarityResult<Arc<ApproximateIndex>> {
        if let Some(index) = self
            .loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(config)
        {
            return Ok(Arc::clone(index));
        }

        let mut loaded = self.loaded.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have loaded it while we waited for the lock.
        if let Some(index) = loaded.get(config) {
            return Ok(Arc::clone(index));
        }
        let index = match ApproximateIndex::load(config.clone(), &self.dir) {
            Ok(index) => Arc::new(index),
            Err(e) if e.is_not_found() => {
                return Err(SimilarityError::IndexNotAvailable {
                    key: config.key(),
                    reason: format!("no index has been built in {}", self.dir.display()),
                });
            }
            Err(e) => return Err(e),
        };
        loaded.insert(config.clone(), Arc::clone(&index));
        Ok(index)
    }

    /// Save a freshly built index and make it the one served for its config.
    pub fn publish(&self, mut index: ApproximateIndex) -> SimilarityResult<Arc<ApproximateIndex>> {
        index.save(&self.dir)?;
        let config = index.config().clone();
        let index = Arc::new(index);
        self.loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config, Arc::clone(&index));
        Ok(index)
    }

    /// Delete the artifact for `config` and drop the cached copy. Returns
    /// whether an artifact was deleted.
    pub fn remove(&self, config: &IndexConfig) -> SimilarityResult<bool> {
        self.loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(config);
        let removed = persist::remove(&self.dir, config)?;
        if removed {
            log::info!("Removed index {}", config);
        }
        Ok(removed)
    }

    /// Configs of every artifact on disk.
    pub fn available(&self) -> SimilarityResult<Vec<IndexConfig>> {
        persist::list(&self.dir)
    }

    /// Whether `config` is currently held in memory.
    pub fn is_loaded(&self, config: &IndexConfig) -> bool {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(config)
    }
}
