//! Multi-segment search (§4.9): deduplicate query hashes, scan the stage
//! and every segment newest-first honoring tombstone shadowing, and
//! return the top-K docs by distinct-hash overlap within a deadline.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use crate::storage::segment_set::SegmentSet;
use crate::storage::stage::Stage;
use crate::storage::types::{DocId, Hash};

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDoc {
    pub id: DocId,
    pub score: u32,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub hits: Vec<ScoredDoc>,
    /// `false` if the deadline was hit before every query hash was scanned.
    pub complete: bool,
}

/// Run a top-`limit` search for `query` against `stage` (newest) and
/// `segments` (newest-first within the set), bounded by `timeout`.
pub fn search(stage: &Stage, segments: &SegmentSet, query: &[Hash], limit: u32, timeout: Duration) -> SearchResult {
    let deadline = Instant::now() + timeout;

    let mut sorted_query: Vec<Hash> = query.to_vec();
    sorted_query.sort_unstable();
    sorted_query.dedup();

    let mut scores: HashMap<DocId, u32> = HashMap::new();
    let mut complete = true;

    'hashes: for &h in &sorted_query {
        if Instant::now() >= deadline {
            complete = false;
            break;
        }

        // Newest-first: the stage, then segments from the end of the set
        // (most recently added) backward.
        let mut live_docs_at_this_hash: Vec<DocId> = Vec::new();

        for doc_id in stage.scan(h) {
            live_docs_at_this_hash.push(doc_id);
        }

        for entry in segments.entries().iter().rev() {
            if Instant::now() >= deadline {
                complete = false;
                break 'hashes;
            }
            let last_version = entry.descriptor.last_version;
            let doc_ids = match entry.segment.scan(h) {
                Ok(ids) => ids,
                Err(_) => continue, // corrupt block: skip rather than fail the whole search
            };
            for doc_id in doc_ids {
                if is_shadowed(stage, segments, doc_id, last_version) {
                    continue;
                }
                live_docs_at_this_hash.push(doc_id);
            }
        }

        live_docs_at_this_hash.sort_unstable();
        live_docs_at_this_hash.dedup();
        for doc_id in live_docs_at_this_hash {
            *scores.entry(doc_id).or_insert(0) += 1;
        }
    }

    let hits = top_k(scores, limit);
    SearchResult { hits, complete }
}

/// A doc id found in a segment whose `last_version == from_version` is
/// shadowed if any segment newer than it (or the stage) tombstones the
/// doc, or holds its own postings for it (a later `Insert` replaced the
/// hash set rather than adding to it).
fn is_shadowed(stage: &Stage, segments: &SegmentSet, doc_id: DocId, from_version: u64) -> bool {
    if stage.contains_tombstone(doc_id) {
        return true;
    }
    if stage.doc_version(doc_id).is_some() {
        return true;
    }
    for entry in segments.entries() {
        if entry.descriptor.last_version <= from_version {
            continue;
        }
        if entry.segment.contains_tombstone(doc_id).unwrap_or(false) {
            return true;
        }
        if entry.segment.contains_doc(doc_id).unwrap_or(false) {
            return true;
        }
    }
    false
}

/// Bounded min-heap top-K: ties broken by smaller `DocId` first (so a
/// min-heap keyed on `(score asc, doc_id desc)` evicts the right loser).
fn top_k(scores: HashMap<DocId, u32>, limit: u32) -> Vec<ScoredDoc> {
    #[derive(Eq, PartialEq)]
    struct Entry {
        score: u32,
        id: DocId,
    }
    impl Ord for Entry {
        fn cmp(&self, other: &Self) -> Ordering {
            // Min-heap by score, with *larger* doc id considered "smaller"
            // so it's evicted first on a tie, leaving the smaller doc id.
            self.score.cmp(&other.score).then(other.id.cmp(&self.id))
        }
    }
    impl PartialOrd for Entry {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }

    let limit = limit as usize;
    let mut heap: BinaryHeap<std::cmp::Reverse<Entry>> = BinaryHeap::with_capacity(limit + 1);
    for (id, score) in scores {
        heap.push(std::cmp::Reverse(Entry { score, id }));
        if heap.len() > limit {
            heap.pop();
        }
    }

    let mut out: Vec<ScoredDoc> = heap.into_iter().map(|std::cmp::Reverse(e)| ScoredDoc { id: e.id, score: e.score }).collect();
    out.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));
    out
}
