//! Announcement indexing and idea recommendation with a deterministic
//! bag-of-words embedder.

use std::sync::atomic::{AtomicUsize, Ordering};

use refvec::{
    index_announcements, similar_top_k, Announcement, Embedder, IngestOptions, RefvecError,
    Result, StoreConfig, VectorStore, DEFAULT_TOP_K,
};
use tempfile::{tempdir, TempDir};

const VOCAB: [&str; 6] = ["youth", "startup", "fund", "export", "green", "energy"];

/// Counts vocabulary words; every other word lands in the last slot.
struct WordCounter {
    calls: AtomicUsize,
}

impl WordCounter {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

impl Embedder for WordCounter {
    fn dimension(&self) -> usize {
        VOCAB.len() + 1
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; VOCAB.len() + 1];
                for word in t.to_lowercase().split_whitespace() {
                    let slot = VOCAB.iter().position(|w| *w == word).unwrap_or(VOCAB.len());
                    v[slot] += 1.0;
                }
                v
            })
            .collect())
    }
}

struct Broken;

impl Embedder for Broken {
    fn dimension(&self) -> usize {
        7
    }

    fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(Vec::new())
    }
}

fn announcement(reference: &str, title: &str, body: &str) -> Announcement {
    Announcement {
        reference: Some(reference.to_string()),
        title: Some(title.to_string()),
        body: Some(body.to_string()),
    }
}

fn store() -> (TempDir, VectorStore) {
    let dir = tempdir().unwrap();
    let store = VectorStore::open(StoreConfig::in_dir(dir.path(), VOCAB.len() + 1)).unwrap();
    (dir, store)
}

#[test]
fn test_index_filters_and_dedupes() {
    let (_dir, store) = store();
    let embedder = WordCounter::new();
    let items = vec![
        announcement("100", "youth startup", "fund"),
        announcement("101", "export", "fund"),
        Announcement {
            reference: None,
            title: Some("no reference".into()),
            body: None,
        },
        announcement("102", "  ", "\n"),
        announcement("100", "green energy", "fund"),
    ];

    let report = index_announcements(&store, &embedder, &items, &IngestOptions::default()).unwrap();
    assert_eq!(report.received, 5);
    assert_eq!(report.upserted, 2);
    assert_eq!(report.skipped, 3);
    assert_eq!(report.ntotal, 2);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

    // The later "100" wins
    let hits = similar_top_k(&store, &embedder, "green", "energy", 1).unwrap();
    assert_eq!(hits[0].reference, "100");
}

#[test]
fn test_numeric_only_filter() {
    let (_dir, store) = store();
    let embedder = WordCounter::new();
    let items = vec![
        announcement("174123", "youth", "startup"),
        announcement("draft-7", "export", "fund"),
    ];
    let options = IngestOptions {
        numeric_refs_only: true,
        save: false,
    };

    let report = index_announcements(&store, &embedder, &items, &options).unwrap();
    assert_eq!(report.upserted, 1);
    assert!(store.contains("174123").unwrap());
    assert!(!store.contains("draft-7").unwrap());
}

#[test]
fn test_reindexing_replaces_vectors() {
    let (_dir, store) = store();
    let embedder = WordCounter::new();
    let options = IngestOptions::default();

    index_announcements(&store, &embedder, &[announcement("1", "export", "")], &options).unwrap();
    index_announcements(&store, &embedder, &[announcement("1", "green", "")], &options).unwrap();

    assert_eq!(store.ntotal().unwrap(), 1);
    let hits = similar_top_k(&store, &embedder, "green", "", 5).unwrap();
    assert!((hits[0].score - 1.0).abs() < 1e-5);
}

#[test]
fn test_ingest_saves_by_default() {
    let dir = tempdir().unwrap();
    let config = StoreConfig::in_dir(dir.path(), VOCAB.len() + 1);
    let embedder = WordCounter::new();
    {
        let store = VectorStore::open(config.clone()).unwrap();
        index_announcements(
            &store,
            &embedder,
            &[announcement("5", "youth", "fund")],
            &IngestOptions::default(),
        )
        .unwrap();
    }
    assert!(VectorStore::open(config).unwrap().contains("5").unwrap());
}

#[test]
fn test_nothing_to_index_skips_embedder() {
    let (_dir, store) = store();
    let embedder = WordCounter::new();
    let report = index_announcements(&store, &embedder, &[], &IngestOptions::default()).unwrap();
    assert_eq!(report.upserted, 0);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_embedder_row_count_checked() {
    let (_dir, store) = store();
    let err = index_announcements(
        &store,
        &Broken,
        &[announcement("1", "youth", "")],
        &IngestOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, RefvecError::Embedding(_)));
    assert!(store.is_empty().unwrap());
}

#[test]
fn test_recommend_ranks_by_similarity() {
    let (_dir, store) = store();
    let embedder = WordCounter::new();
    let items = vec![
        announcement("1", "youth startup fund", ""),
        announcement("2", "export fund", ""),
        announcement("3", "green energy", ""),
    ];
    index_announcements(&store, &embedder, &items, &IngestOptions::default()).unwrap();

    let hits = similar_top_k(&store, &embedder, "youth startup", "needs a fund", DEFAULT_TOP_K).unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].reference, "1");
    assert_eq!(hits[1].reference, "2");
    assert_eq!(hits[2].reference, "3");
}

#[test]
fn test_recommend_empty_idea_or_store() {
    let (_dir, store) = store();
    let embedder = WordCounter::new();
    assert!(similar_top_k(&store, &embedder, "youth", "fund", 5).unwrap().is_empty());

    index_announcements(
        &store,
        &embedder,
        &[announcement("1", "youth", "")],
        &IngestOptions::default(),
    )
    .unwrap();
    assert!(similar_top_k(&store, &embedder, "  ", "\t", 5).unwrap().is_empty());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_empty_batch_reports_persisted_total() {
    let dir = tempdir().unwrap();
    let config = StoreConfig::in_dir(dir.path(), VOCAB.len() + 1);
    let embedder = WordCounter::new();
    {
        let store = VectorStore::open(config.clone()).unwrap();
        index_announcements(
            &store,
            &embedder,
            &[announcement("1", "youth", ""), announcement("2", "export", "")],
            &IngestOptions::default(),
        )
        .unwrap();
    }

    let lazy = VectorStore::new(config).unwrap();
    let report = index_announcements(&lazy, &embedder, &[], &IngestOptions::default()).unwrap();
    assert_eq!(report.ntotal, 2);
}
