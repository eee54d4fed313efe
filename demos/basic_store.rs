//! Basic Store Demo
//!
//! This demo shows the reference-level store operations:
//! - Opening a store in a directory
//! - Adding and upserting vectors by reference
//! - Searching and removing
//! - Saving and reopening
//!
//! Run with: cargo run --example basic_store

use refvec::{Result, StoreConfig, VectorStore};
use std::path::Path;

fn main() -> Result<()> {
    println!("=== refvec Basic Store Demo ===\n");

    let dir = Path::new("demo_store");
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    let config = StoreConfig::in_dir(dir, 3);

    // 1. Open
    println!("1. Opening store in '{}'...", dir.display());
    let store = VectorStore::open(config.clone())?;
    println!("   ✓ {} vectors loaded\n", store.ntotal()?);

    // 2. Add
    println!("2. Adding three announcements...");
    store.add_with_references(
        &[
            vec![1.0f32, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.9999, 0.0141, 0.0],
        ],
        &["174120", "174121", "174122"],
    )?;
    println!("   ✓ ntotal = {}\n", store.ntotal()?);

    // 3. Search
    println!("3. Searching for [1, 0, 0] (k = 2)...");
    for m in store.search(&[1.0, 0.0, 0.0], 2)? {
        println!("   {} -> {:.4}", m.reference, m.score);
    }
    println!();

    // 4. Upsert
    println!("4. Re-embedding 174121...");
    store.upsert_with_references(&[vec![0.0f32, 0.0, 1.0]], &["174121"])?;
    let best = store.search_one(&[0.0, 0.0, 1.0])?;
    println!("   ✓ best match for [0, 0, 1]: {:?}\n", best.map(|m| m.reference));

    // 5. Remove
    println!("5. Removing 174120...");
    let removed = store.remove_by_references(&["174120"])?;
    println!("   ✓ removed {}, ntotal = {}\n", removed, store.ntotal()?);

    // 6. Save and reopen
    println!("6. Saving and reopening...");
    store.save()?;
    drop(store);
    let reopened = VectorStore::open(config)?;
    println!("   ✓ {} vectors after reopen", reopened.ntotal()?);
    println!("   ✓ contains 174122: {}\n", reopened.contains("174122")?);

    std::fs::remove_dir_all(dir)?;
    println!("=== Demo Complete ===");
    Ok(())
}
