// Copyright (c) 2025 Refvec Contributors
// Licensed under the Refvec License. See LICENSE file for details.

//! Saving and loading an index together with its mapping table.
//!
//! Two files make up a persisted store:
//!
//! | File | Format |
//! |------|--------|
//! | index | engine-owned binary, declares its dimension |
//! | mapping | UTF-8 JSON object `{ "<reference>": <id> }` |
//!
//! Each file is written to a temporary sibling and renamed into place, so a
//! crash mid-save leaves the previous file intact rather than a truncated
//! one. The pair is not written atomically as a unit; [`load`] reconciles
//! the two after reading them.
//!
//! Loading builds the new state completely before touching the live index
//! and mapper. A failed load leaves both unchanged.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::CorruptIndexPolicy;
use crate::engine::SimilarityEngine;
use crate::error::{RefvecError, Result};
use crate::index::{load_engine, VectorIndex};
use crate::mapper::ReferenceIdMapper;

/// Outcome of a [`load`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Vectors in the loaded index.
    pub vectors: usize,
    /// References mapped after reconciliation.
    pub references: usize,
    /// Mapping entries dropped because their id had no vector.
    pub dropped_references: usize,
    /// Mapping entries rebuilt from reversible ids.
    pub recovered_references: usize,
    /// Vectors left without a reference. Searches skip them.
    pub orphaned_vectors: usize,
}

/// Writes the index and mapping table.
///
/// Parent directories are created as needed. Does nothing if the index was
/// never initialized.
pub fn save<E: SimilarityEngine>(
    index: &VectorIndex<E>,
    mapper: &ReferenceIdMapper,
    index_path: &Path,
    mapping_path: &Path,
) -> Result<()> {
    let Some(engine) = index.engine() else {
        debug!("index not initialized, nothing to save");
        return Ok(());
    };

    write_atomic(index_path, |tmp| engine.write_to(tmp))?;

    let json = mapper.to_json()?;
    write_atomic(mapping_path, |tmp| {
        let mut file = fs::File::create(tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        Ok(())
    })?;

    info!(
        index = %index_path.display(),
        mapping = %mapping_path.display(),
        vectors = engine.len(),
        references = mapper.len(),
        "store saved"
    );
    Ok(())
}

/// Reads the index and mapping table, replacing `index` and `mapper`.
///
/// A missing index file yields an empty index, a missing mapping file an
/// empty mapping. After both are read:
///
/// - mapping entries whose id has no vector are dropped
/// - vectors without a mapping entry get one back through
///   [`ReferenceIdMapper::recover_reference`] when `recover_orphans` is set
///   and the id is reversible; the rest stay orphaned
///
/// # Errors
///
/// * `RefvecError::DimensionMismatch` - The index file declares another dimension
/// * `RefvecError::CorruptedIndex` - The index file is unreadable (policy `Fail`)
/// * `RefvecError::CorruptedMapping` - The mapping file is unreadable
pub fn load<E: SimilarityEngine>(
    index: &mut VectorIndex<E>,
    mapper: &mut ReferenceIdMapper,
    index_path: &Path,
    mapping_path: &Path,
    policy: CorruptIndexPolicy,
    recover_orphans: bool,
) -> Result<LoadReport> {
    let engine: E = load_engine(Some(index_path), index.dimension(), policy)?;

    let mut loaded = if mapping_path.exists() {
        let bytes = fs::read(mapping_path)?;
        ReferenceIdMapper::from_json(&bytes)?
    } else {
        debug!(path = %mapping_path.display(), "no persisted mapping");
        ReferenceIdMapper::new()
    };

    let report = reconcile(&engine, &mut loaded, recover_orphans);
    index.install(engine)?;
    *mapper = loaded;

    info!(
        vectors = report.vectors,
        references = report.references,
        "store loaded"
    );
    Ok(report)
}

fn reconcile<E: SimilarityEngine>(
    engine: &E,
    mapper: &mut ReferenceIdMapper,
    recover_orphans: bool,
) -> LoadReport {
    let stored: HashSet<_> = engine.ids().into_iter().collect();

    let dangling: Vec<String> = mapper
        .iter()
        .filter(|(_, id)| !stored.contains(id))
        .map(|(r, _)| r.to_string())
        .collect();
    for reference in &dangling {
        mapper.forget(reference);
    }
    if !dangling.is_empty() {
        warn!(
            count = dangling.len(),
            "mapping entries without a stored vector dropped"
        );
    }

    let mut recovered = 0;
    let mut orphaned = 0;
    for &id in &stored {
        if mapper.ref_for(id).is_some() {
            continue;
        }
        let adopted = recover_orphans
            && ReferenceIdMapper::recover_reference(id)
                .filter(|r| !mapper.contains(r))
                .map_or(false, |r| mapper.insert_pair(r, id).is_ok());
        if adopted {
            recovered += 1;
        } else {
            orphaned += 1;
        }
    }
    if recovered > 0 {
        info!(count = recovered, "references recovered from vector ids");
    }
    if orphaned > 0 {
        warn!(
            count = orphaned,
            "vectors without a reference; they are skipped by searches"
        );
    }

    LoadReport {
        vectors: stored.len(),
        references: mapper.len(),
        dropped_references: dangling.len(),
        recovered_references: recovered,
        orphaned_vectors: orphaned,
    }
}

/// Runs `write` against a temporary file next to `path`, then renames it
/// over `path`.
fn write_atomic(path: &Path, write: impl FnOnce(&Path) -> Result<()>) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let tmp = tempfile::Builder::new()
        .prefix(".refvec-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    write(tmp.path())?;
    tmp.persist(path)
        .map_err(|e| RefvecError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flat::FlatIpIndex;
    use tempfile::tempdir;

    fn paths(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        (dir.join("nested/index.bin"), dir.join("nested/refs.json"))
    }

    #[test]
    fn test_save_creates_parent_dirs_and_roundtrips() {
        let dir = tempdir().unwrap();
        let (index_path, mapping_path) = paths(dir.path());

        let mut index: VectorIndex<FlatIpIndex> = VectorIndex::new(2, 1).unwrap();
        let mut mapper = ReferenceIdMapper::new();
        let ids = vec![mapper.id_for("A"), mapper.id_for("B")];
        index.add(&[vec![1.0, 0.0], vec![0.0, 1.0]], &ids).unwrap();

        save(&index, &mapper, &index_path, &mapping_path).unwrap();
        assert!(index_path.exists());
        assert!(mapping_path.exists());

        let mut index2: VectorIndex<FlatIpIndex> = VectorIndex::new(2, 1).unwrap();
        let mut mapper2 = ReferenceIdMapper::new();
        let report = load(
            &mut index2,
            &mut mapper2,
            &index_path,
            &mapping_path,
            CorruptIndexPolicy::Fail,
            true,
        )
        .unwrap();

        assert_eq!(report.vectors, 2);
        assert_eq!(report.references, 2);
        assert_eq!(report.orphaned_vectors, 0);
        assert_eq!(mapper2.get("A"), Some(ids[0]));
        assert_eq!(mapper2.get("B"), Some(ids[1]));
    }

    #[test]
    fn test_save_uninitialized_writes_nothing() {
        let dir = tempdir().unwrap();
        let (index_path, mapping_path) = paths(dir.path());
        let index: VectorIndex<FlatIpIndex> = VectorIndex::new(2, 1).unwrap();
        save(&index, &ReferenceIdMapper::new(), &index_path, &mapping_path).unwrap();
        assert!(!index_path.exists());
    }

    #[test]
    fn test_load_missing_files_is_empty() {
        let dir = tempdir().unwrap();
        let (index_path, mapping_path) = paths(dir.path());
        let mut index: VectorIndex<FlatIpIndex> = VectorIndex::new(2, 1).unwrap();
        let mut mapper = ReferenceIdMapper::new();
        let report = load(
            &mut index,
            &mut mapper,
            &index_path,
            &mapping_path,
            CorruptIndexPolicy::Fail,
            true,
        )
        .unwrap();
        assert_eq!(report, LoadReport::default());
        assert!(index.is_initialized());
    }

    #[test]
    fn test_reconcile_drops_dangling_and_recovers_numeric() {
        let mut engine = FlatIpIndex::new(1).unwrap();
        let numeric = ReferenceIdMapper::derive_id("174123");
        let long = ReferenceIdMapper::derive_id("announcement-9");
        engine.add(&[numeric, long], &[1.0, 1.0]).unwrap();

        let mut mapper = ReferenceIdMapper::new();
        mapper.id_for("ghost");

        let report = reconcile(&engine, &mut mapper, true);
        assert_eq!(report.dropped_references, 1);
        assert_eq!(report.recovered_references, 1);
        assert_eq!(report.orphaned_vectors, 1);
        assert!(!mapper.contains("ghost"));
        assert_eq!(mapper.get("174123"), Some(numeric));
    }

    #[test]
    fn test_reconcile_without_recovery_leaves_orphans() {
        let mut engine = FlatIpIndex::new(1).unwrap();
        engine
            .add(&[ReferenceIdMapper::derive_id("42")], &[1.0])
            .unwrap();
        let mut mapper = ReferenceIdMapper::new();
        let report = reconcile(&engine, &mut mapper, false);
        assert_eq!(report.orphaned_vectors, 1);
        assert!(mapper.is_empty());
    }

    #[test]
    fn test_failed_load_keeps_previous_state() {
        let dir = tempdir().unwrap();
        let (index_path, mapping_path) = paths(dir.path());
        fs::create_dir_all(index_path.parent().unwrap()).unwrap();
        fs::write(&index_path, b"corrupt").unwrap();

        let mut index: VectorIndex<FlatIpIndex> = VectorIndex::new(2, 1).unwrap();
        let mut mapper = ReferenceIdMapper::new();
        let ids = vec![mapper.id_for("A")];
        index.add(&[vec![1.0, 0.0]], &ids).unwrap();

        let err = load(
            &mut index,
            &mut mapper,
            &index_path,
            &mapping_path,
            CorruptIndexPolicy::Fail,
            true,
        )
        .unwrap_err();
        assert!(matches!(err, RefvecError::CorruptedIndex(_)));
        assert_eq!(index.ntotal(), 1);
        assert!(mapper.contains("A"));
    }
}
