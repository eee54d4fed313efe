// Copyright (c) 2025 Refvec Contributors
// Licensed under the Refvec License. See LICENSE file for details.

//! Idea-to-program recommendation.
//!
//! A founder's idea title and description are embedded together and matched
//! against the indexed announcements.

use tracing::warn;

use crate::engine::SimilarityEngine;
use crate::error::Result;
use crate::ingest::{collapse_whitespace, Embedder};
use crate::store::VectorStore;

/// Number of programs returned when the caller does not choose.
pub const DEFAULT_TOP_K: usize = 30;

/// A recommended program.
#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    /// Announcement reference.
    pub reference: String,
    /// Similarity to the idea, higher is better.
    pub score: f32,
}

/// Returns up to `k` programs similar to the idea, best first.
///
/// An empty idea or an empty store yields an empty list rather than an error.
pub fn similar_top_k<E, M>(
    store: &VectorStore<E>,
    embedder: &M,
    idea_title: &str,
    idea_description: &str,
    k: usize,
) -> Result<Vec<Recommendation>>
where
    E: SimilarityEngine,
    M: Embedder + ?Sized,
{
    let query = collapse_whitespace(&format!("{} {}", idea_title, idea_description));
    if query.is_empty() {
        warn!("idea text is empty, skipping similarity search");
        return Ok(Vec::new());
    }

    let vectors = embedder.embed(&[query])?;
    let Some(vector) = vectors.into_iter().next() else {
        return Ok(Vec::new());
    };

    let matches = store.search(&vector, k)?;
    if matches.is_empty() && store.is_empty()? {
        warn!("no announcements indexed, nothing to recommend");
    }

    Ok(matches
        .into_iter()
        .map(|m| Recommendation {
            reference: m.reference,
            score: m.score,
        })
        .collect())
}
