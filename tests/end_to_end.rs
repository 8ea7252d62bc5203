//! Integration tests for the fingerprint index engine, exercised directly
//! against `Index` the way the storage layer itself would be used by the
//! registry — no HTTP involved.

use std::sync::Arc;
use std::time::Duration;

use aindex::metrics::Metrics;
use aindex::storage::{Change, Index, MergePolicyConfig, UpdateBatch};
use tempfile::TempDir;

const DEFAULT_CHECKPOINT_BYTES: usize = 8 * 1024 * 1024;

fn open(dir: &std::path::Path) -> Index {
    open_with_threshold(dir, DEFAULT_CHECKPOINT_BYTES)
}

fn open_with_threshold(dir: &std::path::Path, checkpoint_bytes_threshold: usize) -> Index {
    Index::open(dir, checkpoint_bytes_threshold, MergePolicyConfig::default(), 2, Arc::new(Metrics::new())).unwrap()
}

fn insert(id: u32, hashes: &[u32]) -> UpdateBatch {
    UpdateBatch { changes: vec![Change::Insert { id, hashes: hashes.to_vec() }], ..Default::default() }
}

fn delete(id: u32) -> UpdateBatch {
    UpdateBatch { changes: vec![Change::Delete { id }], ..Default::default() }
}

#[test]
fn basic_insert_and_search() {
    let dir = TempDir::new().unwrap();
    Index::create(dir.path()).unwrap();
    let index = open(dir.path());

    index.apply(insert(1, &[100, 200, 300])).unwrap();

    let result = index.search(&[100, 200, 300], 10, Duration::from_secs(5)).unwrap();
    assert!(result.complete);
    assert_eq!(result.hits.len(), 1);
    assert_eq!(result.hits[0].id, 1);
    assert_eq!(result.hits[0].score, 3);
}

#[test]
fn partial_update_changes_score() {
    let dir = TempDir::new().unwrap();
    Index::create(dir.path()).unwrap();
    let index = open(dir.path());

    index.apply(insert(1, &[100, 200, 300])).unwrap();
    let version = index.apply(insert(1, &[100, 200, 999])).unwrap();
    assert_eq!(version, 2);

    let old_query = index.search(&[100, 200, 300], 10, Duration::from_secs(5)).unwrap();
    assert_eq!(old_query.hits, vec![aindex::storage::ScoredDoc { id: 1, score: 2 }]);

    let new_query = index.search(&[100, 200, 999], 10, Duration::from_secs(5)).unwrap();
    assert_eq!(new_query.hits, vec![aindex::storage::ScoredDoc { id: 1, score: 3 }]);

    assert_eq!(index.fingerprint_version(1).unwrap(), Some(2));
}

#[test]
fn delete_then_search_excludes_doc() {
    let dir = TempDir::new().unwrap();
    Index::create(dir.path()).unwrap();
    let index = open(dir.path());

    index.apply(insert(1, &[100, 200, 300])).unwrap();
    index.apply(delete(1)).unwrap();

    let result = index.search(&[100, 200, 300], 10, Duration::from_secs(5)).unwrap();
    assert!(result.hits.is_empty());
    assert_eq!(index.fingerprint_version(1).unwrap(), None);
}

#[test]
fn persistence_survives_restart() {
    let dir = TempDir::new().unwrap();
    Index::create(dir.path()).unwrap();

    // A small threshold forces several checkpoints across the 100 batches,
    // exercising segment creation as well as oplog replay.
    {
        let index = open_with_threshold(dir.path(), 256);
        for doc_id in 0..100u32 {
            let version = index.apply(insert(doc_id, &[doc_id * 3, doc_id * 3 + 1, doc_id * 3 + 2])).unwrap();
            assert_eq!(version as u32, doc_id + 1);
        }
    }

    let reopened = open_with_threshold(dir.path(), 256);
    assert_eq!(reopened.current_version(), 100);

    let last = 99u32;
    let result = reopened.search(&[last * 3, last * 3 + 1, last * 3 + 2], 10, Duration::from_secs(5)).unwrap();
    assert_eq!(result.hits.len(), 1);
    assert_eq!(result.hits[0].id, last);
    assert_eq!(result.hits[0].score, 3);

    for doc_id in 0..100u32 {
        assert_eq!(reopened.fingerprint_version(doc_id).unwrap(), Some(doc_id as u64 + 1));
    }
}

#[test]
fn optimistic_version_rejects_stale_expected_version() {
    let dir = TempDir::new().unwrap();
    Index::create(dir.path()).unwrap();
    let index = open(dir.path());

    let v = index.current_version();
    let batch = UpdateBatch {
        changes: vec![Change::Insert { id: 1, hashes: vec![1, 2, 3] }],
        metadata: None,
        expected_version: Some(v),
    };
    index.apply(batch).unwrap();

    let stale = UpdateBatch {
        changes: vec![Change::Insert { id: 2, hashes: vec![4, 5, 6] }],
        metadata: None,
        expected_version: Some(v),
    };
    let err = index.apply(stale).unwrap_err();
    assert!(matches!(err, aindex::error::IndexError::VersionMismatch { expected, current } if expected == v && current == v + 1));
}

#[test]
fn large_multi_segment_search_after_restart() {
    let dir = TempDir::new().unwrap();
    Index::create(dir.path()).unwrap();

    const NUM_DOCS: u32 = 50_000;
    const HASHES_PER_DOC: u32 = 100;
    const UNIVERSE: u32 = 256 * 1024;

    {
        let index = open_with_threshold(dir.path(), 2 * 1024 * 1024);
        let mut rng_state: u64 = 0x1234_5678_9abc_def0;
        let mut next_hash = || {
            rng_state ^= rng_state << 13;
            rng_state ^= rng_state >> 7;
            rng_state ^= rng_state << 17;
            (rng_state % UNIVERSE as u64) as u32
        };

        for doc_id in 0..NUM_DOCS {
            let hashes: Vec<u32> = (0..HASHES_PER_DOC).map(|_| next_hash()).collect();
            index.apply(insert(doc_id, &hashes)).unwrap();
        }
    }

    let reopened = open_with_threshold(dir.path(), 2 * 1024 * 1024);
    assert!(reopened.stats().num_segments >= 1);
    assert_eq!(reopened.stats().num_docs, NUM_DOCS as u64);

    // Re-derive doc 100's own hashes by replaying the same deterministic
    // sequence up through its insertion, then confirm an exact-hash query
    // names it as the sole hit.
    let mut rng_state: u64 = 0x1234_5678_9abc_def0;
    let mut next_hash = || {
        rng_state ^= rng_state << 13;
        rng_state ^= rng_state >> 7;
        rng_state ^= rng_state << 17;
        (rng_state % UNIVERSE as u64) as u32
    };
    let mut doc_100_hashes = Vec::new();
    for doc_id in 0..=100u32 {
        let hashes: Vec<u32> = (0..HASHES_PER_DOC).map(|_| next_hash()).collect();
        if doc_id == 100 {
            doc_100_hashes = hashes;
        }
    }
    let mut distinct_hashes = doc_100_hashes.clone();
    distinct_hashes.sort_unstable();
    distinct_hashes.dedup();

    // Querying exactly doc 100's own hash set must place it first, scored
    // at the number of distinct hashes it holds; other docs can only share
    // a subset of those hashes with it, never all of them.
    let result = reopened.search(&doc_100_hashes, 1, Duration::from_secs(10)).unwrap();
    assert_eq!(result.hits.len(), 1);
    assert_eq!(result.hits[0].id, 100);
    assert_eq!(result.hits[0].score, distinct_hashes.len() as u32);
}
