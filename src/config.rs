// Copyright (c) 2025 Refvec Contributors
// Licensed under the Refvec License. See LICENSE file for details.

//! Store configuration.
//!
//! [`StoreConfig`] is a plain struct with sensible defaults. Deployments
//! usually build it with [`StoreConfig::load`], which layers, lowest priority
//! first:
//!
//! - Built-in defaults
//! - `refvec.toml` in the working directory (optional)
//! - `REFVEC_*` environment variables
//!
//! # Environment variables
//!
//! - `REFVEC_INDEX_PATH=data/supports.idx`
//! - `REFVEC_MAPPING_PATH=data/refs.json`
//! - `REFVEC_DIMENSION=384`
//! - `REFVEC_SEARCH_THREADS=1`
//! - `REFVEC_ON_CORRUPT_INDEX=reset_empty`
//! - `REFVEC_RECOVER_ORPHANS=false`

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default configuration file looked up by [`StoreConfig::load`].
pub const CONFIG_FILE: &str = "refvec.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "REFVEC_";

/// What to do when the persisted index file cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptIndexPolicy {
    /// Surface [`RefvecError::CorruptedIndex`](crate::RefvecError::CorruptedIndex).
    /// Data loss is never silent.
    #[default]
    Fail,
    /// Log a warning and continue with an empty index. Vectors saved before
    /// the corruption are lost once the store is saved again.
    ResetEmpty,
}

/// Configuration for a [`VectorStore`](crate::VectorStore).
///
/// # Example
///
/// ```rust
/// use refvec::{CorruptIndexPolicy, StoreConfig};
///
/// let config = StoreConfig {
///     index_path: "data/supports.idx".into(),
///     mapping_path: "data/refs.json".into(),
///     dimension: 384,
///     search_threads: 1,
///     on_corrupt_index: CorruptIndexPolicy::Fail,
///     recover_orphans: true,
/// };
/// assert_eq!(config, StoreConfig::default());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Binary index file.
    /// Default: `data/supports.idx`
    pub index_path: PathBuf,
    /// JSON reference-to-id table.
    /// Default: `data/refs.json`
    pub mapping_path: PathBuf,
    /// Embedding dimension. Fixed for the lifetime of a deployment.
    /// Default: 384 (all-MiniLM-L6-v2)
    pub dimension: usize,
    /// Threads used by each search. `0` uses the shared rayon pool.
    /// Engines running their own thread pools (`FaissEngine` on OpenMP)
    /// ignore it and log a warning at construction.
    /// Default: 1
    pub search_threads: usize,
    /// Behaviour on an undecodable index file.
    /// Default: [`CorruptIndexPolicy::Fail`]
    pub on_corrupt_index: CorruptIndexPolicy,
    /// Rebuild mapping entries for vectors whose reference can be derived
    /// back from the id (short references such as numeric announcement ids).
    /// Default: true
    pub recover_orphans: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("data/supports.idx"),
            mapping_path: PathBuf::from("data/refs.json"),
            dimension: 384,
            search_threads: 1,
            on_corrupt_index: CorruptIndexPolicy::Fail,
            recover_orphans: true,
        }
    }
}

impl StoreConfig {
    /// Loads defaults, then `refvec.toml`, then `REFVEC_*` variables.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Like [`load`](Self::load) with an explicit TOML file path.
    ///
    /// A missing file is not an error.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(StoreConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Config with both files placed in `dir` under their default names.
    pub fn in_dir(dir: impl AsRef<Path>, dimension: usize) -> Self {
        let dir = dir.as_ref();
        Self {
            index_path: dir.join("supports.idx"),
            mapping_path: dir.join("refs.json"),
            dimension,
            ..Default::default()
        }
    }
}
