// Copyright (c) 2025 Refvec Contributors
// Licensed under the Refvec License. See LICENSE file for details.

//! Exact inner-product index.
//!
//! [`FlatIpIndex`] keeps every vector in one contiguous row-major buffer and
//! answers queries by scoring all of them. For the corpus sizes this crate
//! targets (tens of thousands of announcements) an exact scan is fast enough
//! and has perfect recall.
//!
//! Rows are removed with swap-remove, so deletion is O(dimension) and the
//! buffer never has holes. Large scans are split across the current rayon
//! pool; [`VectorIndex`](crate::index::VectorIndex) decides which pool that is.
//!
//! # File format
//!
//! | Field | Size |
//! |-------|------|
//! | Magic `RVIX` | 4 bytes |
//! | Version | u16 LE |
//! | Dimension | u32 LE |
//! | Ids and rows | bincode `(Vec<u64>, Vec<f32>)` |

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::engine::SimilarityEngine;
use crate::error::{RefvecError, Result};
use crate::mapper::InternalId;
use crate::similarity::inner_product;

/// Magic bytes for flat index files
const FLAT_MAGIC: &[u8; 4] = b"RVIX";

/// Current version of the flat index file format
const FLAT_VERSION: u16 = 1;

/// Magic + version + dimension
const HEADER_LEN: usize = 4 + 2 + 4;

/// Row count from which scans are split across the rayon pool.
const PARALLEL_SCAN_THRESHOLD: usize = 4096;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    ids: &'a [InternalId],
    rows: &'a [f32],
}

#[derive(Deserialize)]
struct Snapshot {
    ids: Vec<u64>,
    rows: Vec<f32>,
}

/// Exact inner-product engine.
#[derive(Debug, Clone)]
pub struct FlatIpIndex {
    dimension: usize,
    ids: Vec<InternalId>,
    rows: Vec<f32>,
    positions: HashMap<InternalId, usize>,
}

impl FlatIpIndex {
    /// Creates an empty index.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RefvecError::Validation(
                "dimension must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            dimension,
            ids: Vec::new(),
            rows: Vec::new(),
            positions: HashMap::new(),
        })
    }

    /// Returns the stored vector for `id`.
    pub fn vector(&self, id: InternalId) -> Option<&[f32]> {
        let pos = *self.positions.get(&id)?;
        Some(self.row(pos))
    }

    fn row(&self, pos: usize) -> &[f32] {
        &self.rows[pos * self.dimension..(pos + 1) * self.dimension]
    }

    fn push(&mut self, id: InternalId, row: &[f32]) {
        if let Some(&pos) = self.positions.get(&id) {
            let start = pos * self.dimension;
            self.rows[start..start + self.dimension].copy_from_slice(row);
            return;
        }
        self.positions.insert(id, self.ids.len());
        self.ids.push(id);
        self.rows.extend_from_slice(row);
    }

    fn swap_remove(&mut self, id: InternalId) -> bool {
        let Some(pos) = self.positions.remove(&id) else {
            return false;
        };
        let last = self.ids.len() - 1;
        if pos != last {
            let moved = self.ids[last];
            self.ids[pos] = moved;
            let dim = self.dimension;
            self.rows.copy_within(last * dim..(last + 1) * dim, pos * dim);
            self.positions.insert(moved, pos);
        }
        self.ids.pop();
        self.rows.truncate(last * self.dimension);
        true
    }

    fn scores(&self, query: &[f32]) -> Vec<(InternalId, f32)> {
        let dim = self.dimension;
        if self.ids.len() >= PARALLEL_SCAN_THRESHOLD {
            self.rows
                .par_chunks_exact(dim)
                .zip(self.ids.par_iter())
                .map(|(row, &id)| (id, inner_product(query, row)))
                .collect()
        } else {
            self.rows
                .chunks_exact(dim)
                .zip(self.ids.iter())
                .map(|(row, &id)| (id, inner_product(query, row)))
                .collect()
        }
    }
}

/// Descending score, then ascending id for deterministic ties.
fn rank(a: &(InternalId, f32), b: &(InternalId, f32)) -> std::cmp::Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

fn corrupted(msg: impl Into<String>) -> RefvecError {
    RefvecError::CorruptedIndex(msg.into())
}

impl SimilarityEngine for FlatIpIndex {
    fn create(dimension: usize) -> Result<Self> {
        Self::new(dimension)
    }

    fn read_from(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        if bytes.len() < HEADER_LEN {
            return Err(corrupted(format!(
                "file is {} bytes, shorter than the {}-byte header",
                bytes.len(),
                HEADER_LEN
            )));
        }

        if &bytes[0..4] != FLAT_MAGIC {
            return Err(corrupted("invalid magic bytes - not a refvec index file"));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != FLAT_VERSION {
            return Err(corrupted(format!(
                "unsupported version: {} (expected {})",
                version, FLAT_VERSION
            )));
        }

        let dimension = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        let snapshot: Snapshot = bincode::deserialize(&bytes[HEADER_LEN..])
            .map_err(|e| corrupted(format!("unreadable body: {}", e)))?;

        if snapshot.rows.len() != snapshot.ids.len() * dimension {
            return Err(corrupted(format!(
                "{} ids but {} floats for dimension {}",
                snapshot.ids.len(),
                snapshot.rows.len(),
                dimension
            )));
        }

        let mut index = Self::new(dimension).map_err(|_| corrupted("dimension is zero"))?;
        index.rows.reserve(snapshot.rows.len());
        for (raw, row) in snapshot.ids.iter().zip(snapshot.rows.chunks_exact(dimension)) {
            let id = InternalId::new(*raw).ok_or_else(|| corrupted(format!("invalid id {}", raw)))?;
            if index.positions.contains_key(&id) {
                return Err(corrupted(format!("duplicate id {}", id)));
            }
            index.push(id, row);
        }
        Ok(index)
    }

    fn write_to(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(FLAT_MAGIC)?;
        writer.write_all(&FLAT_VERSION.to_le_bytes())?;
        writer.write_all(&(self.dimension as u32).to_le_bytes())?;
        bincode::serialize_into(
            &mut writer,
            &SnapshotRef {
                ids: &self.ids,
                rows: &self.rows,
            },
        )?;

        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn contains(&self, id: InternalId) -> bool {
        self.positions.contains_key(&id)
    }

    fn ids(&self) -> Vec<InternalId> {
        self.ids.clone()
    }

    fn add(&mut self, ids: &[InternalId], rows: &[f32]) -> Result<()> {
        if rows.len() != ids.len() * self.dimension {
            return Err(RefvecError::Validation(format!(
                "{} floats for {} ids of dimension {}",
                rows.len(),
                ids.len(),
                self.dimension
            )));
        }
        self.ids.reserve(ids.len());
        self.rows.reserve(rows.len());
        for (&id, row) in ids.iter().zip(rows.chunks_exact(self.dimension)) {
            self.push(id, row);
        }
        Ok(())
    }

    fn remove(&mut self, ids: &[InternalId]) -> Result<usize> {
        Ok(ids.iter().filter(|&&id| self.swap_remove(id)).count())
    }

    fn search(&mut self, query: &[f32], k: usize) -> Result<Vec<(InternalId, f32)>> {
        if query.len() != self.dimension {
            return Err(RefvecError::Validation(format!(
                "query has {} dimensions, index has {}",
                query.len(),
                self.dimension
            )));
        }
        if k == 0 || self.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored = self.scores(query);
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, rank);
            scored.truncate(k);
        }
        scored.sort_unstable_by(rank);
        Ok(scored)
    }
}
