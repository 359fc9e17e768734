//! Integration tests for the LRU replacer

use std::sync::Arc;
use std::thread;

use quarry::buffer::LruReplacer;
use quarry::common::FrameId;

#[test]
fn test_lru_scenario() {
    let replacer = LruReplacer::new(7);

    // Unpin six frames; all become evictable in order
    for i in 1..=6 {
        replacer.unpin(FrameId::new(i));
    }
    assert_eq!(replacer.size(), 6);

    // Re-unpinning frame 1 changes nothing
    replacer.unpin(FrameId::new(1));
    assert_eq!(replacer.size(), 6);

    // Victims come out oldest first
    assert_eq!(replacer.victim(), Some(FrameId::new(1)));
    assert_eq!(replacer.victim(), Some(FrameId::new(2)));
    assert_eq!(replacer.victim(), Some(FrameId::new(3)));

    // Pin removes frames from consideration
    replacer.pin(FrameId::new(4));
    assert_eq!(replacer.size(), 2);

    replacer.unpin(FrameId::new(4));

    assert_eq!(replacer.victim(), Some(FrameId::new(5)));
    assert_eq!(replacer.victim(), Some(FrameId::new(6)));
    assert_eq!(replacer.victim(), Some(FrameId::new(4)));
    assert_eq!(replacer.victim(), None);
    assert_eq!(replacer.size(), 0);
}

#[test]
fn test_lru_pin_absent_frame_is_noop() {
    let replacer = LruReplacer::new(4);
    replacer.pin(FrameId::new(3));
    assert_eq!(replacer.size(), 0);
    assert_eq!(replacer.victim(), None);
}

#[test]
fn test_lru_capacity_bound() {
    let replacer = LruReplacer::new(3);

    for i in 0..5 {
        replacer.unpin(FrameId::new(i));
    }

    // Only the newest three survive
    assert_eq!(replacer.size(), 3);
    assert_eq!(replacer.victim(), Some(FrameId::new(2)));
    assert_eq!(replacer.victim(), Some(FrameId::new(3)));
    assert_eq!(replacer.victim(), Some(FrameId::new(4)));
}

#[test]
fn test_lru_concurrent_unpin() {
    let replacer = Arc::new(LruReplacer::new(64));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let replacer = Arc::clone(&replacer);
            thread::spawn(move || {
                for i in 0..16 {
                    replacer.unpin(FrameId::new(t * 16 + i));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(replacer.size(), 64);

    let mut victims = std::collections::HashSet::new();
    while let Some(frame) = replacer.victim() {
        assert!(victims.insert(frame), "duplicate victim {}", frame);
    }
    assert_eq!(victims.len(), 64);
}
