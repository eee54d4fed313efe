// Copyright (c) 2025 Refvec Contributors
// Licensed under the Refvec License. See LICENSE file for details.

//! Indexing of fetched program announcements.
//!
//! The collector that pages through the announcement API hands its batches to
//! [`index_announcements`], which turns them into embeddings and upserts them
//! into a [`VectorStore`]:
//!
//! 1. Drop items without a reference or without any text
//! 2. Optionally keep only all-digit references
//! 3. Keep the last occurrence of each reference
//! 4. Build `title + " " + body` with whitespace collapsed
//! 5. Embed, upsert, and save
//!
//! The embedding model is an [`Embedder`]; this crate never loads one.

use std::collections::HashMap;

use tracing::info;

use crate::engine::SimilarityEngine;
use crate::error::{RefvecError, Result};
use crate::store::VectorStore;

/// Text to embedding function.
///
/// Implementations return one L2-normalized row of [`dimension`](Self::dimension)
/// floats per input text, in order.
pub trait Embedder {
    /// Length of every returned vector.
    fn dimension(&self) -> usize;

    /// Embeds `texts` in order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// One support-program announcement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Announcement {
    /// External announcement id.
    pub reference: Option<String>,
    /// Announcement title.
    pub title: Option<String>,
    /// Announcement body.
    pub body: Option<String>,
}

impl Announcement {
    /// Text used for the embedding: title and body, whitespace collapsed.
    pub fn index_text(&self) -> String {
        let title = collapse_whitespace(self.title.as_deref().unwrap_or(""));
        let body = collapse_whitespace(self.body.as_deref().unwrap_or(""));
        format!("{} {}", title, body).trim().to_string()
    }
}

/// Options for [`index_announcements`].
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Skip announcements whose reference is not all ASCII digits.
    /// Default: false
    pub numeric_refs_only: bool,
    /// Save the store after upserting.
    /// Default: true
    pub save: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            numeric_refs_only: false,
            save: true,
        }
    }
}

/// Counts reported by [`index_announcements`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Announcements handed in.
    pub received: usize,
    /// Announcements dropped by filtering or deduplication.
    pub skipped: usize,
    /// References upserted.
    pub upserted: usize,
    /// Vectors in the store afterwards.
    pub ntotal: usize,
}

/// Collapses runs of whitespace into single spaces and trims the ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Embeds `items` and upserts them into `store`.
///
/// # Errors
///
/// * `RefvecError::Embedding` - The embedder failed or returned the wrong
///   number of rows
/// * Anything [`VectorStore::upsert_with_references`] or
///   [`VectorStore::save`] reports
pub fn index_announcements<E, M>(
    store: &VectorStore<E>,
    embedder: &M,
    items: &[Announcement],
    options: &IngestOptions,
) -> Result<IngestReport>
where
    E: SimilarityEngine,
    M: Embedder + ?Sized,
{
    let mut kept: Vec<(String, String)> = Vec::with_capacity(items.len());
    for item in items {
        let Some(reference) = item.reference.as_deref().map(str::trim) else {
            continue;
        };
        if reference.is_empty() {
            continue;
        }
        if options.numeric_refs_only && !reference.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let text = item.index_text();
        if text.is_empty() {
            continue;
        }
        kept.push((reference.to_string(), text));
    }

    // Last occurrence wins, first-seen order kept
    let mut last: HashMap<&str, usize> = HashMap::with_capacity(kept.len());
    for (i, (reference, _)) in kept.iter().enumerate() {
        last.insert(reference.as_str(), i);
    }
    let mut order: Vec<usize> = last.into_values().collect();
    order.sort_unstable();

    let refs: Vec<&str> = order.iter().map(|&i| kept[i].0.as_str()).collect();
    let texts: Vec<String> = order.iter().map(|&i| kept[i].1.clone()).collect();

    let mut report = IngestReport {
        received: items.len(),
        skipped: items.len() - refs.len(),
        ..Default::default()
    };

    if refs.is_empty() {
        info!(received = report.received, "no indexable announcements");
        report.ntotal = store.ntotal()?;
        return Ok(report);
    }

    let vectors = embedder.embed(&texts)?;
    if vectors.len() != refs.len() {
        return Err(RefvecError::Embedding(format!(
            "embedder returned {} vectors for {} texts",
            vectors.len(),
            refs.len()
        )));
    }

    report.upserted = store.upsert_with_references(&vectors, &refs)?;
    if options.save {
        store.save()?;
    }
    report.ntotal = store.ntotal()?;

    info!(
        received = report.received,
        skipped = report.skipped,
        upserted = report.upserted,
        ntotal = report.ntotal,
        "announcements indexed"
    );
    Ok(report)
}
