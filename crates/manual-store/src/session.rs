//! Memoized handle on the live index generation.

use std::sync::{Arc, RwLock};

use tracing::debug;

use manual_core::{ManualError, Result};

use crate::layout::StorageLayout;
use crate::loaded::LoadedIndex;

/// Owns the storage layout and the in-memory copy of the live generation.
///
/// The first [`IndexSession::get`] loads from disk; later calls reuse the
/// cached handle until [`IndexSession::replace`] or
/// [`IndexSession::invalidate`] is called.
pub struct IndexSession {
    layout: StorageLayout,
    dimension: usize,
    model_id: String,
    loaded: RwLock<Option<Arc<LoadedIndex>>>,
}

impl IndexSession {
    /// Create a session for an embedding provider of the given dimension and model.
    pub fn new(layout: StorageLayout, dimension: usize, model_id: impl Into<String>) -> Self {
        Self {
            layout,
            dimension,
            model_id: model_id.into(),
            loaded: RwLock::new(None),
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// The live index, loading it on first use.
    pub fn get(&self) -> Result<Arc<LoadedIndex>> {
        if let Some(loaded) = self.cached()? {
            debug!("Reusing loaded index {}", loaded.meta.build_id);
            return Ok(loaded);
        }

        let mut slot = self
            .loaded
            .write()
            .map_err(|e| ManualError::internal(format!("index lock poisoned: {}", e)))?;

        // Another caller may have loaded it while we waited for the lock.
        if let Some(loaded) = slot.as_ref() {
            return Ok(Arc::clone(loaded));
        }

        let loaded = Arc::new(LoadedIndex::load(
            &self.layout,
            self.dimension,
            &self.model_id,
        )?);
        *slot = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// The cached index without touching disk.
    pub fn cached(&self) -> Result<Option<Arc<LoadedIndex>>> {
        let slot = self
            .loaded
            .read()
            .map_err(|e| ManualError::internal(format!("index lock poisoned: {}", e)))?;
        Ok(slot.clone())
    }

    /// Swap in a freshly built index.
    pub fn replace(&self, loaded: Arc<LoadedIndex>) -> Result<()> {
        let mut slot = self
            .loaded
            .write()
            .map_err(|e| ManualError::internal(format!("index lock poisoned: {}", e)))?;
        debug!("Swapping in index {}", loaded.meta.build_id);
        *slot = Some(loaded);
        Ok(())
    }

    /// Drop the cached index; the next `get` reloads from disk.
    pub fn invalidate(&self) -> Result<()> {
        let mut slot = self
            .loaded
            .write()
            .map_err(|e| ManualError::internal(format!("index lock poisoned: {}", e)))?;
        *slot = None;
        Ok(())
    }
}
