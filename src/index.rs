// Copyright (c) 2025 Refvec Contributors
// Licensed under the Refvec License. See LICENSE file for details.

//! Validated wrapper around a [`SimilarityEngine`].
//!
//! [`VectorIndex`] owns at most one engine and adds the semantics the
//! engines leave out:
//!
//! - Shape and finiteness validation of every batch and query
//! - L2 normalization of stored rows and of every query
//! - Upsert on add: an id that is already stored has its old vector removed
//!   first, and a batch that repeats an id keeps the last row
//! - `k` clamped to `[1, ntotal]`, results never padded
//! - Dimension validation when an engine is loaded from disk
//! - Searches pinned to a dedicated rayon pool
//!
//! # Search thread pinning
//!
//! With `search_threads > 0` a pool of that many threads is built once, at
//! construction, and each search runs inside [`rayon::ThreadPool::install`].
//! The thread count therefore applies for exactly the duration of the call
//! and never leaks into the caller's pool. The default of one thread keeps
//! searches off shared pools entirely. `0` uses the global rayon pool.

use std::collections::HashMap;
use std::path::Path;

use rayon::ThreadPool;
use tracing::{debug, info, warn};

use crate::config::CorruptIndexPolicy;
use crate::engine::SimilarityEngine;
use crate::error::{RefvecError, Result};
use crate::flat::FlatIpIndex;
use crate::mapper::InternalId;
use crate::similarity::{is_finite, normalize, normalized};

/// Similarity index keyed by [`InternalId`].
pub struct VectorIndex<E: SimilarityEngine = FlatIpIndex> {
    dimension: usize,
    engine: Option<E>,
    search_pool: Option<ThreadPool>,
}

impl<E: SimilarityEngine> VectorIndex<E> {
    /// Creates an uninitialized index for `dimension`-sized vectors.
    ///
    /// No engine exists until [`ensure_initialized`](Self::ensure_initialized)
    /// or the first mutation.
    pub fn new(dimension: usize, search_threads: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RefvecError::Validation(
                "dimension must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            dimension,
            engine: None,
            search_pool: search_pool_for::<E>(search_threads),
        })
    }

    /// Returns `true` if searches run on a dedicated pool.
    pub fn pins_search_threads(&self) -> bool {
        self.search_pool.is_some()
    }

    /// Configured vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns `true` once an engine exists.
    pub fn is_initialized(&self) -> bool {
        self.engine.is_some()
    }

    /// Read access to the engine, if initialized.
    pub fn engine(&self) -> Option<&E> {
        self.engine.as_ref()
    }

    /// Makes sure an engine exists.
    ///
    /// When none exists yet, it is read from `persisted` if that file exists,
    /// otherwise a fresh empty engine is created.
    ///
    /// # Errors
    ///
    /// * `RefvecError::DimensionMismatch` - The file declares another dimension
    /// * `RefvecError::CorruptedIndex` - The file is unreadable and `policy`
    ///   is [`CorruptIndexPolicy::Fail`]
    pub fn ensure_initialized(
        &mut self,
        persisted: Option<&Path>,
        policy: CorruptIndexPolicy,
    ) -> Result<()> {
        if self.engine.is_none() {
            self.engine = Some(load_engine(persisted, self.dimension, policy)?);
        }
        Ok(())
    }

    /// Installs an engine produced by [`load_engine`].
    pub(crate) fn install(&mut self, engine: E) -> Result<()> {
        if engine.dimension() != self.dimension {
            return Err(RefvecError::DimensionMismatch {
                expected: self.dimension,
                got: engine.dimension(),
            });
        }
        self.engine = Some(engine);
        Ok(())
    }

    /// Replaces the engine with a fresh empty one.
    pub fn reset(&mut self) -> Result<()> {
        self.engine = Some(E::create(self.dimension)?);
        Ok(())
    }

    fn engine_mut(&mut self) -> Result<&mut E> {
        if self.engine.is_none() {
            self.engine = Some(E::create(self.dimension)?);
        }
        self.engine
            .as_mut()
            .ok_or_else(|| RefvecError::Engine("engine missing after initialization".to_string()))
    }

    /// Inserts `vectors[i]` under `ids[i]`, replacing existing vectors.
    ///
    /// Returns the number of distinct ids written.
    ///
    /// # Errors
    ///
    /// * `RefvecError::Validation` - Row count differs from id count, a row
    ///   has the wrong dimension, or a row holds a non-finite value
    pub fn add<V: AsRef<[f32]>>(&mut self, vectors: &[V], ids: &[InternalId]) -> Result<usize> {
        if vectors.len() != ids.len() {
            return Err(RefvecError::Validation(format!(
                "{} vectors but {} ids",
                vectors.len(),
                ids.len()
            )));
        }
        for (i, row) in vectors.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != self.dimension {
                return Err(RefvecError::Validation(format!(
                    "vector {} has {} dimensions, expected {}",
                    i,
                    row.len(),
                    self.dimension
                )));
            }
            if !is_finite(row) {
                return Err(RefvecError::Validation(format!(
                    "vector {} contains a non-finite value",
                    i
                )));
            }
        }
        if ids.is_empty() {
            return Ok(0);
        }

        // Last occurrence of each id wins
        let mut last: HashMap<InternalId, usize> = HashMap::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            last.insert(*id, i);
        }
        let mut unique_ids = Vec::with_capacity(last.len());
        let mut rows = Vec::with_capacity(last.len() * self.dimension);
        for (i, id) in ids.iter().enumerate() {
            if last[id] != i {
                continue;
            }
            let start = rows.len();
            rows.extend_from_slice(vectors[i].as_ref());
            normalize(&mut rows[start..]);
            unique_ids.push(*id);
        }

        let engine = self.engine_mut()?;
        let existing: Vec<InternalId> = unique_ids
            .iter()
            .copied()
            .filter(|id| engine.contains(*id))
            .collect();
        if !existing.is_empty() {
            engine.remove(&existing)?;
        }
        engine.add(&unique_ids, &rows)?;

        debug!(
            added = unique_ids.len(),
            replaced = existing.len(),
            ntotal = engine.len(),
            "vectors added"
        );
        Ok(unique_ids.len())
    }

    /// Removes the given ids, returning how many were stored.
    pub fn remove(&mut self, ids: &[InternalId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        match self.engine.as_mut() {
            Some(engine) => engine.remove(ids),
            None => Ok(0),
        }
    }

    /// Returns up to `k` `(id, score)` pairs, best first.
    ///
    /// The query is re-normalized before searching, and `k` is clamped to
    /// `[1, ntotal]`. An empty index yields an empty result.
    ///
    /// # Errors
    ///
    /// * `RefvecError::Validation` - The query has the wrong dimension or a
    ///   non-finite value
    pub fn search(&mut self, query: &[f32], k: usize) -> Result<Vec<(InternalId, f32)>> {
        if query.len() != self.dimension {
            return Err(RefvecError::Validation(format!(
                "query has {} dimensions, expected {}",
                query.len(),
                self.dimension
            )));
        }
        if !is_finite(query) {
            return Err(RefvecError::Validation(
                "query contains a non-finite value".to_string(),
            ));
        }

        let ntotal = self.ntotal();
        if ntotal == 0 {
            return Ok(Vec::new());
        }
        let k = k.clamp(1, ntotal);
        let query = normalized(query);

        let Self {
            engine,
            search_pool,
            ..
        } = self;
        let Some(engine) = engine.as_mut() else {
            return Ok(Vec::new());
        };
        match search_pool {
            Some(pool) => pool.install(|| engine.search(&query, k)),
            None => engine.search(&query, k),
        }
    }

    /// Number of stored vectors.
    pub fn ntotal(&self) -> usize {
        self.engine.as_ref().map_or(0, |e| e.len())
    }
}

fn search_pool_for<E: SimilarityEngine>(threads: usize) -> Option<ThreadPool> {
    if !E::follows_rayon_pool() {
        if threads > 0 {
            warn!(
                threads,
                "engine schedules its own search threads, search_threads has no effect"
            );
        }
        return None;
    }
    build_search_pool(threads)
}

fn build_search_pool(threads: usize) -> Option<ThreadPool> {
    if threads == 0 {
        info!("searches use the shared rayon pool");
        return None;
    }
    match rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("refvec-search-{}", i))
        .build()
    {
        Ok(pool) => {
            info!(threads, "search thread pool ready");
            Some(pool)
        }
        Err(e) => {
            warn!(threads, error = %e, "search thread pool unavailable, using the shared rayon pool");
            None
        }
    }
}

/// Reads an engine from `persisted` when that file exists, else creates an
/// empty one.
pub(crate) fn load_engine<E: SimilarityEngine>(
    persisted: Option<&Path>,
    dimension: usize,
    policy: CorruptIndexPolicy,
) -> Result<E> {
    let Some(path) = persisted.filter(|p| p.exists()) else {
        debug!(dimension, "no persisted index, creating an empty one");
        return E::create(dimension);
    };

    match E::read_from(path) {
        Ok(engine) if engine.dimension() != dimension => Err(RefvecError::DimensionMismatch {
            expected: dimension,
            got: engine.dimension(),
        }),
        Ok(engine) => {
            info!(path = %path.display(), ntotal = engine.len(), "index loaded");
            Ok(engine)
        }
        Err(RefvecError::CorruptedIndex(reason)) if policy == CorruptIndexPolicy::ResetEmpty => {
            warn!(
                path = %path.display(),
                %reason,
                "index file is corrupted, starting from an empty index; previously saved vectors are discarded"
            );
            E::create(dimension)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn id(raw: u64) -> InternalId {
        InternalId::new(raw).unwrap()
    }

    fn index(dim: usize) -> VectorIndex {
        VectorIndex::new(dim, 1).unwrap()
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(matches!(
            VectorIndex::<FlatIpIndex>::new(0, 1),
            Err(RefvecError::Validation(_))
        ));
    }

    #[test]
    fn test_add_validates_shapes() {
        let mut idx = index(3);
        let rows = vec![vec![1.0, 0.0, 0.0]];
        assert!(matches!(
            idx.add(&rows, &[id(1), id(2)]),
            Err(RefvecError::Validation(_))
        ));
        assert!(matches!(
            idx.add(&[vec![1.0, 0.0]], &[id(1)]),
            Err(RefvecError::Validation(_))
        ));
        assert!(matches!(
            idx.add(&[vec![f32::NAN, 0.0, 0.0]], &[id(1)]),
            Err(RefvecError::Validation(_))
        ));
        assert_eq!(idx.ntotal(), 0);
    }

    #[test]
    fn test_add_replaces_existing_id() {
        let mut idx = index(2);
        idx.add(&[vec![1.0, 0.0]], &[id(1)]).unwrap();
        idx.add(&[vec![0.0, 1.0]], &[id(1)]).unwrap();
        assert_eq!(idx.ntotal(), 1);

        let hits = idx.search(&[0.0, 1.0], 1).unwrap();
        assert_eq!(hits[0].0, id(1));
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_add_duplicate_ids_in_batch_keeps_last() {
        let mut idx = index(2);
        let written = idx
            .add(&[vec![1.0, 0.0], vec![0.0, 1.0]], &[id(1), id(1)])
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(idx.ntotal(), 1);
        let hits = idx.search(&[0.0, 1.0], 1).unwrap();
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rows_are_normalized() {
        let mut idx = index(2);
        idx.add(&[vec![3.0, 4.0]], &[id(1)]).unwrap();
        let hits = idx.search(&[3.0, 4.0], 1).unwrap();
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_clamps_k() {
        let mut idx = index(2);
        idx
            .add(&[vec![1.0, 0.0], vec![0.0, 1.0]], &[id(1), id(2)])
            .unwrap();
        assert_eq!(idx.search(&[1.0, 0.0], 0).unwrap().len(), 1);
        assert_eq!(idx.search(&[1.0, 0.0], 100).unwrap().len(), 2);
    }

    #[test]
    fn test_search_empty_index() {
        let mut idx = index(2);
        assert!(idx.search(&[1.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_search_rejects_wrong_dimension() {
        let mut idx = index(2);
        assert!(matches!(
            idx.search(&[1.0, 0.0, 0.0], 1),
            Err(RefvecError::Validation(_))
        ));
    }

    #[test]
    fn test_unnormalized_query_scores_like_unit_query() {
        let mut idx = index(2);
        idx.add(&[vec![0.6, 0.8]], &[id(1)]).unwrap();
        let hits = idx.search(&[6.0, 8.0], 1).unwrap();
        assert!((hits[0].1 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_remove_counts_present_ids() {
        let mut idx = index(2);
        assert_eq!(idx.remove(&[id(1)]).unwrap(), 0);
        idx.add(&[vec![1.0, 0.0]], &[id(1)]).unwrap();
        assert_eq!(idx.remove(&[id(1), id(2)]).unwrap(), 1);
        assert_eq!(idx.ntotal(), 0);
    }

    #[test]
    fn test_shared_pool_mode() {
        let mut idx: VectorIndex = VectorIndex::new(2, 0).unwrap();
        assert!(!idx.pins_search_threads());
        idx.add(&[vec![1.0, 0.0]], &[id(1)]).unwrap();
        assert_eq!(idx.search(&[1.0, 0.0], 1).unwrap().len(), 1);
    }

    #[test]
    fn test_dedicated_pool_for_rayon_engines() {
        assert!(index(2).pins_search_threads());
    }

    /// Flat engine that claims to run its own threads.
    struct SelfThreaded(FlatIpIndex);

    impl SimilarityEngine for SelfThreaded {
        fn create(dimension: usize) -> Result<Self> {
            FlatIpIndex::create(dimension).map(SelfThreaded)
        }
        fn read_from(path: &Path) -> Result<Self> {
            FlatIpIndex::read_from(path).map(SelfThreaded)
        }
        fn write_to(&self, path: &Path) -> Result<()> {
            self.0.write_to(path)
        }
        fn dimension(&self) -> usize {
            self.0.dimension()
        }
        fn len(&self) -> usize {
            self.0.len()
        }
        fn contains(&self, id: InternalId) -> bool {
            self.0.contains(id)
        }
        fn ids(&self) -> Vec<InternalId> {
            self.0.ids()
        }
        fn add(&mut self, ids: &[InternalId], rows: &[f32]) -> Result<()> {
            self.0.add(ids, rows)
        }
        fn remove(&mut self, ids: &[InternalId]) -> Result<usize> {
            self.0.remove(ids)
        }
        fn search(&mut self, query: &[f32], k: usize) -> Result<Vec<(InternalId, f32)>> {
            self.0.search(query, k)
        }
        fn follows_rayon_pool() -> bool {
            false
        }
    }

    #[test]
    fn test_self_threaded_engine_gets_no_pool() {
        let mut idx: VectorIndex<SelfThreaded> = VectorIndex::new(2, 4).unwrap();
        assert!(!idx.pins_search_threads());
        idx.add(&[vec![0.0, 1.0]], &[id(3)]).unwrap();
        assert_eq!(idx.search(&[0.0, 1.0], 1).unwrap()[0].0, id(3));
    }

    #[test]
    fn test_ensure_initialized_validates_dimension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.bin");
        let mut engine = FlatIpIndex::new(4).unwrap();
        engine.add(&[id(1)], &[1.0, 0.0, 0.0, 0.0]).unwrap();
        engine.write_to(&path).unwrap();

        let mut idx = index(3);
        let err = idx
            .ensure_initialized(Some(&path), CorruptIndexPolicy::Fail)
            .unwrap_err();
        assert!(matches!(
            err,
            RefvecError::DimensionMismatch {
                expected: 3,
                got: 4
            }
        ));
        assert!(!idx.is_initialized());
    }

    #[test]
    fn test_corrupt_index_policy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.bin");
        std::fs::write(&path, b"garbage").unwrap();

        let mut strict = index(3);
        assert!(matches!(
            strict.ensure_initialized(Some(&path), CorruptIndexPolicy::Fail),
            Err(RefvecError::CorruptedIndex(_))
        ));

        let mut lenient = index(3);
        lenient
            .ensure_initialized(Some(&path), CorruptIndexPolicy::ResetEmpty)
            .unwrap();
        assert!(lenient.is_initialized());
        assert_eq!(lenient.ntotal(), 0);
    }
}
