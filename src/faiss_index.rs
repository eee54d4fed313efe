// Copyright (c) 2025 Refvec Contributors
// Licensed under the Refvec License. See LICENSE file for details.

//! FAISS-backed similarity engine.
//!
//! Wraps an `IDMap,Flat` inner-product index so FAISS keeps the caller's ids.
//! FAISS cannot list the ids it holds, so the engine tracks them itself and
//! persists them next to the serialized FAISS index in one file:
//!
//! ```text
//! "RVFX" | version: u16 LE | dimension: u32 LE | bincode { ids, faiss }
//! ```
//!
//! FAISS searches on OpenMP threads, which `search_threads` does not
//! control. Cap them with `OMP_NUM_THREADS` before the process starts.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use faiss::{index::IndexImpl, index_factory, selector::IdSelector, Idx, Index, MetricType};
use serde::{Deserialize, Serialize};

use crate::engine::SimilarityEngine;
use crate::error::{RefvecError, Result};
use crate::mapper::InternalId;

const MAGIC: &[u8; 4] = b"RVFX";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 10;

/// Index factory description used for every engine.
pub const FACTORY: &str = "IDMap,Flat";

#[derive(Serialize, Deserialize)]
struct Container {
    ids: Vec<u64>,
    faiss: Vec<u8>,
}

/// Exact inner-product search through FAISS.
pub struct FaissEngine {
    index: IndexImpl,
    dimension: usize,
    ids: HashSet<InternalId>,
}

fn engine_err(op: &str, e: faiss::error::Error) -> RefvecError {
    RefvecError::Engine(format!("FAISS {} failed: {}", op, e))
}

fn corrupted(msg: impl Into<String>) -> RefvecError {
    RefvecError::CorruptedIndex(msg.into())
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        RefvecError::Validation(format!("path is not valid UTF-8: {}", path.display()))
    })
}

impl SimilarityEngine for FaissEngine {
    fn create(dimension: usize) -> Result<Self> {
        let d = u32::try_from(dimension)
            .map_err(|_| RefvecError::Validation(format!("dimension {} too large", dimension)))?;
        let index = index_factory(d, FACTORY, MetricType::InnerProduct)
            .map_err(|e| engine_err("index creation", e))?;
        Ok(Self {
            index,
            dimension,
            ids: HashSet::new(),
        })
    }

    fn read_from(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        if bytes.len() < HEADER_LEN || &bytes[0..4] != MAGIC {
            return Err(corrupted("not a FAISS engine file"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(corrupted(format!("unsupported version {}", version)));
        }
        let dimension = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        let container: Container = bincode::deserialize(&bytes[HEADER_LEN..])
            .map_err(|e| corrupted(format!("container: {}", e)))?;

        let tmp = tempfile::NamedTempFile::new()?;
        fs::write(tmp.path(), &container.faiss)?;
        let index = faiss::read_index(path_str(tmp.path())?)
            .map_err(|e| corrupted(format!("FAISS index: {}", e)))?;

        if index.d() as usize != dimension {
            return Err(corrupted(format!(
                "header declares {} dimensions, FAISS index has {}",
                dimension,
                index.d()
            )));
        }
        if index.ntotal() as usize != container.ids.len() {
            return Err(corrupted(format!(
                "{} ids for {} vectors",
                container.ids.len(),
                index.ntotal()
            )));
        }
        let ids = container
            .ids
            .into_iter()
            .map(|raw| InternalId::new(raw).ok_or_else(|| corrupted(format!("invalid id {}", raw))))
            .collect::<Result<HashSet<_>>>()?;

        Ok(Self {
            index,
            dimension,
            ids,
        })
    }

    fn write_to(&self, path: &Path) -> Result<()> {
        let tmp = tempfile::NamedTempFile::new()?;
        faiss::write_index(&self.index, path_str(tmp.path())?)
            .map_err(|e| engine_err("write", e))?;
        let container = Container {
            ids: self.ids.iter().map(|id| id.get()).collect(),
            faiss: fs::read(tmp.path())?,
        };

        let mut out = Vec::with_capacity(HEADER_LEN + container.faiss.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        out.extend_from_slice(&bincode::serialize(&container)?);
        fs::write(path, out)?;
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.index.ntotal() as usize
    }

    fn contains(&self, id: InternalId) -> bool {
        self.ids.contains(&id)
    }

    fn ids(&self) -> Vec<InternalId> {
        self.ids.iter().copied().collect()
    }

    fn add(&mut self, ids: &[InternalId], rows: &[f32]) -> Result<()> {
        let labels: Vec<Idx> = ids.iter().map(|id| Idx::new(id.get())).collect();
        self.index
            .add_with_ids(rows, &labels)
            .map_err(|e| engine_err("add", e))?;
        self.ids.extend(ids.iter().copied());
        Ok(())
    }

    fn remove(&mut self, ids: &[InternalId]) -> Result<usize> {
        let present: Vec<Idx> = ids
            .iter()
            .filter(|id| self.ids.contains(id))
            .map(|id| Idx::new(id.get()))
            .collect();
        if present.is_empty() {
            return Ok(0);
        }
        let selector = IdSelector::batch(&present).map_err(|e| engine_err("selector", e))?;
        let removed = self
            .index
            .remove_ids(&selector)
            .map_err(|e| engine_err("remove", e))?;
        for id in ids {
            self.ids.remove(id);
        }
        Ok(removed)
    }

    fn search(&mut self, query: &[f32], k: usize) -> Result<Vec<(InternalId, f32)>> {
        let result = self
            .index
            .search(query, k)
            .map_err(|e| engine_err("search", e))?;

        Ok(result
            .distances
            .iter()
            .zip(result.labels.iter())
            .filter_map(|(score, label)| {
                label
                    .get()
                    .and_then(InternalId::new)
                    .map(|id| (id, *score))
            })
            .collect())
    }

    fn follows_rayon_pool() -> bool {
        false
    }
}
