// Copyright (c) 2025 Refvec Contributors
// Licensed under the Refvec License. See LICENSE file for details.

//! Single-construction store handles.
//!
//! A deployment keeps exactly one [`VectorStore`] per index/mapping file
//! pair. [`StoreCell`] enforces that: the first [`StoreCell::get`] builds the
//! store and loads it, every later call returns a clone of the same
//! [`Arc`]. The cell itself is an ordinary value, so it can be created by the
//! application and passed to whatever layer needs the store.
//!
//! [`global_store`] wraps one process-wide cell configured by
//! [`StoreConfig::load`] for callers that cannot thread a handle through.
//!
//! # Locking
//!
//! Double-checked: [`StoreCell::get`] first reads the cell without locking.
//! Only callers that find it empty take the init mutex, and they check again
//! before constructing, so at most one of them builds the store. A failed
//! construction leaves the cell empty and the next call retries.

use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;
use tracing::info;

use crate::config::StoreConfig;
use crate::engine::SimilarityEngine;
use crate::error::Result;
use crate::flat::FlatIpIndex;
use crate::store::VectorStore;

/// Shared handle to a store.
pub type StoreHandle<E = FlatIpIndex> = Arc<VectorStore<E>>;

/// Lazily constructed, load-once store.
pub struct StoreCell<E: SimilarityEngine = FlatIpIndex> {
    config: StoreConfig,
    store: OnceCell<StoreHandle<E>>,
    init: Mutex<()>,
}

impl<E: SimilarityEngine> StoreCell<E> {
    /// Creates an empty cell. Nothing is built until [`get`](Self::get).
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            store: OnceCell::new(),
            init: Mutex::new(()),
        }
    }

    /// Returns the store, building and loading it on first use.
    ///
    /// # Errors
    ///
    /// Whatever [`VectorStore::open_with_engine`] reports. The cell stays
    /// empty in that case.
    pub fn get(&self) -> Result<StoreHandle<E>> {
        if let Some(store) = self.store.get() {
            return Ok(Arc::clone(store));
        }

        let _guard = self.init.lock();
        if let Some(store) = self.store.get() {
            return Ok(Arc::clone(store));
        }

        let store = Arc::new(VectorStore::<E>::open_with_engine(self.config.clone())?);
        let ntotal = store.ntotal()?;
        info!(
            index = %self.config.index_path.display(),
            dimension = self.config.dimension,
            ntotal,
            "store initialized"
        );
        // Only this thread holds `init`, so the cell is still empty here.
        let _ = self.store.set(Arc::clone(&store));
        Ok(store)
    }

    /// Returns the store if it was already built.
    pub fn get_if_initialized(&self) -> Option<StoreHandle<E>> {
        self.store.get().cloned()
    }

    /// Configuration used for construction.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

static GLOBAL: Lazy<Mutex<Option<Arc<StoreCell>>>> = Lazy::new(|| Mutex::new(None));

/// Returns the process-wide store.
///
/// The first call reads [`StoreConfig::load`] and builds the store; a
/// configuration error is returned and retried on the next call.
pub fn global_store() -> Result<StoreHandle> {
    global_cell()?.get()
}

fn global_cell() -> Result<Arc<StoreCell>> {
    let mut slot = GLOBAL.lock();
    if let Some(cell) = slot.as_ref() {
        return Ok(Arc::clone(cell));
    }
    let cell = Arc::new(StoreCell::new(StoreConfig::load()?));
    *slot = Some(Arc::clone(&cell));
    Ok(cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use tempfile::tempdir;

    #[test]
    fn test_get_returns_same_instance() {
        let dir = tempdir().unwrap();
        let cell: StoreCell = StoreCell::new(StoreConfig::in_dir(dir.path(), 2));
        assert!(cell.get_if_initialized().is_none());

        let a = cell.get().unwrap();
        let b = cell.get().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(cell.get_if_initialized().is_some());
    }

    #[test]
    fn test_failed_construction_leaves_cell_empty() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::in_dir(dir.path(), 2);
        std::fs::write(&config.index_path, b"corrupt").unwrap();

        let cell: StoreCell = StoreCell::new(config.clone());
        assert!(cell.get().is_err());
        assert!(cell.get_if_initialized().is_none());

        std::fs::remove_file(&config.index_path).unwrap();
        assert!(cell.get().is_ok());
    }

    #[test]
    fn test_global_store_is_process_wide() {
        Jail::expect_with(|jail| {
            let dir = jail.directory().to_path_buf();
            jail.set_env("REFVEC_INDEX_PATH", dir.join("global.idx").display());
            jail.set_env("REFVEC_MAPPING_PATH", dir.join("global.json").display());
            jail.set_env("REFVEC_DIMENSION", 4);

            let a = global_store().expect("global store builds");
            let b = global_store().expect("global store builds");
            assert!(Arc::ptr_eq(&a, &b));
            assert_eq!(a.config().index_path, dir.join("global.idx"));
            assert_eq!(a.dimension(), 4);
            Ok(())
        });
    }
}
