// Copyright (c) 2025 Refvec Contributors
// Licensed under the Refvec License. See LICENSE file for details.

//! Reference-keyed vector store.
//!
//! [`VectorStore`] is the entry point callers use. It speaks only in
//! references, translating to and from [`InternalId`]s through a
//! [`ReferenceIdMapper`], and delegates storage to a [`VectorIndex`] and the
//! [`persistence`](crate::persistence) functions.
//!
//! # Locking
//!
//! Every operation, reads included, runs under one reentrant mutex owned by
//! the store. Searches and writes are fully serialized, and `save` always
//! observes a state between two complete operations.
//!
//! # Lazy loading
//!
//! [`VectorStore::open`] loads persisted state immediately. A store built
//! with [`VectorStore::new`] loads on its first operation, accessors
//! ([`contains`](VectorStore::contains), [`ntotal`](VectorStore::ntotal),
//! [`is_empty`](VectorStore::is_empty)) included, so a reading never changes
//! without a mutation in between. Only [`save`](VectorStore::save) and
//! [`clear`](VectorStore::clear) skip the load.
//!
//! # Example
//!
//! ```rust,no_run
//! use refvec::{StoreConfig, VectorStore};
//!
//! fn main() -> refvec::Result<()> {
//!     let store = VectorStore::open(StoreConfig::in_dir("data", 3))?;
//!
//!     store.upsert_with_references(&[vec![1.0f32, 0.0, 0.0]], &["174123"])?;
//!     store.save()?;
//!
//!     for m in store.search(&[1.0, 0.0, 0.0], 5)? {
//!         println!("{}: {:.4}", m.reference, m.score);
//!     }
//!     Ok(())
//! }
//! ```

use std::cell::RefCell;

use parking_lot::ReentrantMutex;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::engine::SimilarityEngine;
use crate::error::{RefvecError, Result};
use crate::flat::FlatIpIndex;
use crate::index::VectorIndex;
use crate::mapper::{InternalId, ReferenceIdMapper};
use crate::persistence::{self, LoadReport};

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// Reference of the matching vector.
    pub reference: String,
    /// Inner product with the normalized query (higher = more similar).
    pub score: f32,
}

struct StoreState<E: SimilarityEngine> {
    index: VectorIndex<E>,
    mapper: ReferenceIdMapper,
}

impl<E: SimilarityEngine> StoreState<E> {
    fn ensure_loaded(&mut self, config: &StoreConfig) -> Result<()> {
        if self.index.is_initialized() {
            return Ok(());
        }
        persistence::load(
            &mut self.index,
            &mut self.mapper,
            &config.index_path,
            &config.mapping_path,
            config.on_corrupt_index,
            config.recover_orphans,
        )?;
        Ok(())
    }

    fn add<V: AsRef<[f32]>, R: AsRef<str>>(&mut self, vectors: &[V], refs: &[R]) -> Result<usize> {
        let mut fresh = Vec::new();
        let ids: Vec<InternalId> = refs
            .iter()
            .map(|r| {
                let r = r.as_ref();
                if !self.mapper.contains(r) {
                    fresh.push(r);
                }
                self.mapper.id_for(r)
            })
            .collect();

        match self.index.add(vectors, &ids) {
            Ok(n) => Ok(n),
            Err(e) => {
                for r in fresh {
                    self.mapper.forget(r);
                }
                Err(e)
            }
        }
    }

    fn remove<R: AsRef<str>>(&mut self, refs: &[R]) -> Result<usize> {
        let ids: Vec<InternalId> = refs
            .iter()
            .filter_map(|r| self.mapper.get(r.as_ref()))
            .collect();
        let removed = self.index.remove(&ids)?;
        for r in refs {
            self.mapper.forget(r.as_ref());
        }
        Ok(removed)
    }
}

/// Thread-safe, reference-keyed vector store.
pub struct VectorStore<E: SimilarityEngine = FlatIpIndex> {
    config: StoreConfig,
    state: ReentrantMutex<RefCell<StoreState<E>>>,
}

impl VectorStore {
    /// Creates a store backed by the exact [`FlatIpIndex`] engine without
    /// touching disk.
    ///
    /// # Errors
    ///
    /// * `RefvecError::Validation` - `config.dimension` is zero
    pub fn new(config: StoreConfig) -> Result<Self> {
        Self::with_engine(config)
    }

    /// Creates a store backed by [`FlatIpIndex`] and loads its persisted state.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::open_with_engine(config)
    }
}

impl<E: SimilarityEngine> VectorStore<E> {
    /// Creates a store backed by engine `E` without touching disk.
    pub fn with_engine(config: StoreConfig) -> Result<Self> {
        let index = VectorIndex::new(config.dimension, config.search_threads)?;
        Ok(Self {
            config,
            state: ReentrantMutex::new(RefCell::new(StoreState {
                index,
                mapper: ReferenceIdMapper::new(),
            })),
        })
    }

    /// Creates a store backed by engine `E` and loads its persisted state.
    pub fn open_with_engine(config: StoreConfig) -> Result<Self> {
        let store = Self::with_engine(config)?;
        store.load()?;
        Ok(store)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut StoreState<E>) -> Result<T>) -> Result<T> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Configuration the store was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Configured vector dimension.
    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    /// Stores `vectors[i]` under `refs[i]`.
    ///
    /// A reference that already has a vector gets it replaced. Returns the
    /// number of distinct references written.
    ///
    /// # Errors
    ///
    /// * `RefvecError::Validation` - `refs.len()` differs from the row count,
    ///   or a row has the wrong dimension or a non-finite value
    pub fn add_with_references<V, R>(&self, vectors: &[V], refs: &[R]) -> Result<usize>
    where
        V: AsRef<[f32]>,
        R: AsRef<str>,
    {
        check_lengths(vectors.len(), refs.len())?;
        self.with_state(|state| {
            state.ensure_loaded(&self.config)?;
            state.add(vectors, refs)
        })
    }

    /// Removes `refs` and adds them back with `vectors`, as one locked step.
    ///
    /// Shapes are validated before anything is removed, so a rejected batch
    /// leaves the store unchanged.
    pub fn upsert_with_references<V, R>(&self, vectors: &[V], refs: &[R]) -> Result<usize>
    where
        V: AsRef<[f32]>,
        R: AsRef<str>,
    {
        check_lengths(vectors.len(), refs.len())?;
        check_rows(vectors, self.config.dimension)?;
        self.with_state(|state| {
            state.ensure_loaded(&self.config)?;
            let removed = state.remove(refs)?;
            let added = state.add(vectors, refs)?;
            debug!(removed, added, "upsert applied");
            Ok(added)
        })
    }

    /// Removes the vectors and mapping entries of `refs`.
    ///
    /// Unknown references are ignored. Returns how many vectors were removed.
    pub fn remove_by_references<R: AsRef<str>>(&self, refs: &[R]) -> Result<usize> {
        self.with_state(|state| {
            state.ensure_loaded(&self.config)?;
            state.remove(refs)
        })
    }

    /// Returns up to `k` matches for `query`, best first.
    ///
    /// Vectors without a known reference are skipped.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Match>> {
        self.with_state(|state| {
            state.ensure_loaded(&self.config)?;
            let hits = state.index.search(query, k)?;
            Ok(hits
                .into_iter()
                .filter_map(|(id, score)| {
                    state.mapper.ref_for(id).map(|reference| Match {
                        reference: reference.to_string(),
                        score,
                    })
                })
                .collect())
        })
    }

    /// Returns the best match for `query`, if any.
    pub fn search_one(&self, query: &[f32]) -> Result<Option<Match>> {
        Ok(self.search(query, 1)?.into_iter().next())
    }

    /// Returns `true` if `reference` currently has a vector.
    ///
    /// # Errors
    ///
    /// Whatever loading the persisted state reports on first use.
    pub fn contains(&self, reference: &str) -> Result<bool> {
        self.with_state(|state| {
            state.ensure_loaded(&self.config)?;
            Ok(state.mapper.contains(reference))
        })
    }

    /// Number of stored vectors, loading persisted state on first use.
    pub fn ntotal(&self) -> Result<usize> {
        self.with_state(|state| {
            state.ensure_loaded(&self.config)?;
            Ok(state.index.ntotal())
        })
    }

    /// Returns `true` if no vectors are stored.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.ntotal()? == 0)
    }

    /// Replaces the in-memory state with the persisted one.
    ///
    /// On error the in-memory state is left as it was.
    pub fn load(&self) -> Result<LoadReport> {
        self.with_state(|state| {
            persistence::load(
                &mut state.index,
                &mut state.mapper,
                &self.config.index_path,
                &self.config.mapping_path,
                self.config.on_corrupt_index,
                self.config.recover_orphans,
            )
        })
    }

    /// Persists the index and mapping table.
    pub fn save(&self) -> Result<()> {
        self.with_state(|state| {
            persistence::save(
                &state.index,
                &state.mapper,
                &self.config.index_path,
                &self.config.mapping_path,
            )
        })
    }

    /// Drops every vector and reference.
    ///
    /// Files on disk are untouched until the next [`save`](Self::save).
    pub fn clear(&self) -> Result<()> {
        self.with_state(|state| {
            state.index.reset()?;
            state.mapper.clear();
            info!("store cleared");
            Ok(())
        })
    }
}

fn check_lengths(rows: usize, refs: usize) -> Result<()> {
    if rows != refs {
        return Err(RefvecError::Validation(format!(
            "{} references for {} vectors",
            refs, rows
        )));
    }
    Ok(())
}

fn check_rows<V: AsRef<[f32]>>(vectors: &[V], dimension: usize) -> Result<()> {
    for (i, row) in vectors.iter().enumerate() {
        let row = row.as_ref();
        if row.len() != dimension {
            return Err(RefvecError::Validation(format!(
                "vector {} has {} dimensions, expected {}",
                i,
                row.len(),
                dimension
            )));
        }
        if row.iter().any(|x| !x.is_finite()) {
            return Err(RefvecError::Validation(format!(
                "vector {} contains a non-finite value",
                i
            )));
        }
    }
    Ok(())
}
