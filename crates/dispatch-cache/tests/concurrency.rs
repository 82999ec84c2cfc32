//! Concurrent access keeps the key/tag index mirrored.

use dispatch_cache::{CacheConfig, TagCache};
use dispatch_core::cache::EntryOptions;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn tag_set(i: usize) -> Vec<String> {
    vec![
        format!("group:{}", i % 4),
        format!("parity:{}", i % 2),
        "all".to_string(),
    ]
}

#[test]
fn test_index_stays_consistent_under_concurrent_writes() {
    let cache = Arc::new(TagCache::new(
        CacheConfig::default()
            .with_max_entries(64)
            .with_sweep_interval(None),
    ));
    let options = EntryOptions::absolute(Duration::from_secs(300));

    thread::scope(|scope| {
        for worker in 0..8 {
            let cache = cache.clone();
            scope.spawn(move || {
                for i in 0..500 {
                    let key = format!("k{}", (worker * 31 + i) % 100);
                    match i % 7 {
                        0 => {
                            cache.invalidate_tag(&format!("group:{}", i % 4));
                        }
                        1 => {
                            cache.remove(&key);
                        }
                        2 => {
                            cache.get(&key);
                        }
                        _ => cache.set(&key, vec![worker as u8; 16], &tag_set(i), options),
                    }
                }
            });
        }
    });

    let index = cache.index();
    assert!(index.is_consistent());
    // Every indexed key still has an entry, so no tag points at a dead key.
    for key in index.indexed_keys() {
        assert!(cache.get(&key).is_some(), "index retains removed key {key}");
    }
}

#[test]
fn test_invalidate_all_during_writes_leaves_no_residue() {
    let cache = Arc::new(TagCache::default());
    let options = EntryOptions::absolute(Duration::from_secs(300));

    thread::scope(|scope| {
        let writer = cache.clone();
        scope.spawn(move || {
            for i in 0..1_000 {
                writer.set(&format!("k{i}"), vec![1], &tag_set(i), options);
            }
        });
        let clearer = cache.clone();
        scope.spawn(move || {
            for _ in 0..20 {
                clearer.invalidate_all();
            }
        });
    });

    cache.invalidate_all();
    assert!(cache.is_empty());
    assert_eq!(cache.index().tag_count(), 0);
    assert!(cache.index().indexed_keys().is_empty());
}
