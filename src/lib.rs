// Copyright (c) 2025 Refvec Contributors
// Licensed under the Refvec License. See LICENSE file for details.

//! # Refvec
//!
//! Reference-keyed vector index and similarity search for matching startup
//! ideas against support-program announcements.
//!
//! Announcements are identified by string references assigned by an external
//! API. Refvec maps each reference to a stable 63-bit id, stores one
//! L2-normalized embedding per reference, answers top-k inner-product
//! queries, and persists the index and the reference table across restarts.
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`ReferenceIdMapper`] | Deterministic reference to id mapping with collision probing |
//! | [`VectorIndex`] | Validation, normalization and upsert over a [`SimilarityEngine`] |
//! | [`FlatIpIndex`] | Exact inner-product scan, the default engine |
//! | [`persistence`] | Atomic save and reconciling load of index plus mapping |
//! | [`VectorStore`] | Thread-safe reference-level API |
//! | [`StoreCell`] / [`global_store`] | One store per process |
//! | [`ingest`] / [`recommend`] | Announcement indexing and idea recommendation |
//!
//! The optional `faiss` feature adds `faiss_index::FaissEngine`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use refvec::{Result, StoreConfig, VectorStore};
//!
//! fn main() -> Result<()> {
//!     let store = VectorStore::open(StoreConfig::in_dir("data", 3))?;
//!
//!     store.upsert_with_references(
//!         &[vec![1.0f32, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
//!         &["174123", "174124"],
//!     )?;
//!     store.save()?;
//!
//!     let hits = store.search(&[0.9, 0.1, 0.0], 2)?;
//!     assert_eq!(hits[0].reference, "174123");
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! [`StoreConfig::load`] layers defaults, `refvec.toml` and `REFVEC_*`
//! environment variables.

pub mod config;
pub mod engine;
pub mod error;
#[cfg(feature = "faiss")]
pub mod faiss_index;
pub mod flat;
pub mod index;
pub mod ingest;
pub mod mapper;
pub mod persistence;
pub mod recommend;
pub mod registry;
pub mod similarity;
pub mod store;

pub use config::{CorruptIndexPolicy, StoreConfig};
pub use engine::SimilarityEngine;
pub use error::{RefvecError, Result};
pub use flat::FlatIpIndex;
pub use index::VectorIndex;
pub use mapper::{InternalId, ReferenceIdMapper};
pub use persistence::LoadReport;
pub use store::{Match, VectorStore};

// Process-wide handle
pub use registry::{global_store, StoreCell, StoreHandle};

// Ingestion and recommendation
pub use ingest::{index_announcements, Announcement, Embedder, IngestOptions, IngestReport};
pub use recommend::{similar_top_k, Recommendation, DEFAULT_TOP_K};

#[cfg(feature = "faiss")]
pub use faiss_index::FaissEngine;
