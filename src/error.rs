// Copyright (c) 2025 Refvec Contributors
// Licensed under the Refvec License. See LICENSE file for details.

//! Error types for refvec operations.
//!
//! This module provides:
//! - [`RefvecError`] - The main error enum
//! - [`Result<T>`] - A type alias for `std::result::Result<T, RefvecError>`
//!
//! Lookup misses (searching an id with no reference, removing a reference
//! that was never added) are not errors. They surface as empty results.

/// Result type alias for refvec operations.
///
/// This is equivalent to `std::result::Result<T, RefvecError>`.
pub type Result<T> = std::result::Result<T, RefvecError>;

/// Error taxonomy for the vector index and its persistence.
///
/// # Examples
///
/// ```rust
/// use refvec::{RefvecError, StoreConfig, VectorStore};
///
/// let store = VectorStore::new(StoreConfig {
///     dimension: 3,
///     ..Default::default()
/// }).unwrap();
///
/// // Two rows but only one reference
/// let rows = vec![vec![1.0f32, 0.0, 0.0], vec![0.0, 1.0, 0.0]];
/// match store.add_with_references(&rows, &["A"]) {
///     Err(RefvecError::Validation(msg)) => println!("rejected: {}", msg),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum RefvecError {
    /// I/O error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON encoding or decoding error for the mapping file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Caller passed mismatched shapes, lengths or non-finite values.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Persisted index dimension disagrees with the configured dimension.
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Configured number of dimensions
        expected: usize,
        /// Number of dimensions found
        got: usize,
    },

    /// Persisted index bytes are unreadable, truncated or inconsistent.
    #[error("Corrupted index: {0}")]
    CorruptedIndex(String),

    /// Persisted mapping table is unreadable or inconsistent.
    #[error("Corrupted mapping: {0}")]
    CorruptedMapping(String),

    /// Failure reported by a similarity engine backend.
    #[error("Engine error: {0}")]
    Engine(String),

    /// Failure reported by an [`Embedder`](crate::ingest::Embedder).
    #[error("Embedding error: {0}")]
    Embedding(String),
}

impl RefvecError {
    /// Returns `true` when the error was caused by the caller's input.
    ///
    /// Boundary layers map these to a client error (4xx) and everything
    /// else to a server error (5xx).
    pub fn is_client_error(&self) -> bool {
        matches!(self, RefvecError::Validation(_))
    }
}

impl From<figment::Error> for RefvecError {
    fn from(err: figment::Error) -> Self {
        RefvecError::Config(Box::new(err))
    }
}
