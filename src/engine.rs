// Copyright (c) 2025 Refvec Contributors
// Licensed under the Refvec License. See LICENSE file for details.

//! Capability interface for similarity engines.
//!
//! [`VectorIndex`](crate::index::VectorIndex) only talks to engines through
//! [`SimilarityEngine`], so an exact scan ([`FlatIpIndex`](crate::flat::FlatIpIndex))
//! and a library-provided index (`FaissEngine`, behind the `faiss` feature)
//! are interchangeable.
//!
//! Engines score by inner product and return higher-is-better scores. They
//! are not expected to validate shapes or normalize vectors; the wrapper does
//! that before calling in.

use std::path::Path;

use crate::error::Result;
use crate::mapper::InternalId;

/// Operations every similarity engine provides.
pub trait SimilarityEngine: Send + Sized {
    /// Creates an empty engine for `dimension`-sized vectors.
    fn create(dimension: usize) -> Result<Self>;

    /// Reads an engine previously written with [`write_to`](Self::write_to).
    ///
    /// Unreadable or inconsistent files are
    /// [`RefvecError::CorruptedIndex`](crate::RefvecError::CorruptedIndex).
    fn read_from(path: &Path) -> Result<Self>;

    /// Serializes the engine to `path`, replacing any existing file.
    fn write_to(&self, path: &Path) -> Result<()>;

    /// Dimension declared by the engine.
    fn dimension(&self) -> usize;

    /// Number of stored vectors.
    fn len(&self) -> usize;

    /// Returns `true` if no vectors are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `id` has a stored vector.
    fn contains(&self, id: InternalId) -> bool;

    /// Every stored id, in arbitrary order.
    fn ids(&self) -> Vec<InternalId>;

    /// Inserts row-major `rows` under `ids`.
    ///
    /// Callers guarantee `rows.len() == ids.len() * dimension()` and that no
    /// id is already stored or repeated.
    fn add(&mut self, ids: &[InternalId], rows: &[f32]) -> Result<()>;

    /// Removes the given ids, returning how many were present.
    fn remove(&mut self, ids: &[InternalId]) -> Result<usize>;

    /// Returns up to `k` `(id, score)` pairs ordered by descending score.
    fn search(&mut self, query: &[f32], k: usize) -> Result<Vec<(InternalId, f32)>>;

    /// Whether searches run on the calling rayon pool.
    ///
    /// Engines that schedule their own threads (FAISS uses OpenMP) return
    /// `false`; a dedicated search pool cannot bound them.
    fn follows_rayon_pool() -> bool {
        true
    }
}
