//! Ordered collection of on-disk segments plus the tiered merge policy (§4.6).
//!
//! Grounded in the teacher's compaction coordinator (`should_compact` /
//! `compact_shard`): a policy function decides *when* to merge, a merge
//! function decides *what* the merged output looks like. The teacher's
//! merge builds a `HashMap` keyed by node id because its segments are
//! columnar and unsorted across files; here segments are already sorted
//! by `(Hash, DocId)`, so the merge is a streaming k-way merge instead —
//! it never materializes the full cross product of postings in memory.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::Result;
use crate::storage::segment::{AttributeMap, Segment, SegmentWriter};
use crate::storage::types::{DocId, Posting, SegmentDescriptor, Version};

/// Tunables for the tiered merge policy (§9 open questions keeps these
/// configurable rather than hard-coded, per [`crate::config::Config`]).
#[derive(Debug, Clone, Copy)]
pub struct MergePolicyConfig {
    pub ratio: u32,
    pub fan_in: usize,
}

impl Default for MergePolicyConfig {
    fn default() -> Self {
        Self { ratio: 4, fan_in: 4 }
    }
}

/// `floor(log_R(num_postings))`, with `num_postings == 0` pinned to tier 0.
pub fn tier_of(num_postings: u64, ratio: u32) -> u32 {
    if num_postings == 0 {
        return 0;
    }
    (num_postings as f64).log(ratio as f64).floor().max(0.0) as u32
}

/// One entry in the ordered, oldest-first segment list.
pub struct SegmentEntry {
    pub descriptor: SegmentDescriptor,
    pub segment: Segment,
}

/// The durable segment list for one index, oldest first. Reads scan every
/// entry; only the checkpointer and merge policy mutate it, and only by
/// producing a brand new `SegmentSet` that a manifest publish swaps in.
#[derive(Default)]
pub struct SegmentSet {
    entries: Vec<SegmentEntry>,
}

impl SegmentSet {
    pub fn new(entries: Vec<SegmentEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[SegmentEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Segments grouped by tier under `ratio`, in entry (oldest-first) order.
    fn tiers(&self, ratio: u32) -> std::collections::BTreeMap<u32, Vec<usize>> {
        let mut tiers: std::collections::BTreeMap<u32, Vec<usize>> = Default::default();
        for (i, e) in self.entries.iter().enumerate() {
            let tier = tier_of(e.descriptor.num_postings, ratio);
            tiers.entry(tier).or_default().push(i);
        }
        tiers
    }

    /// Find the first tier with at least `fan_in` segments and return the
    /// indices (oldest-first) of the segments to merge, if any.
    pub fn find_merge_candidate(&self, policy: MergePolicyConfig) -> Option<Vec<usize>> {
        for (_, indices) in self.tiers(policy.ratio) {
            if indices.len() >= policy.fan_in {
                return Some(indices);
            }
        }
        None
    }

    /// Merge the segments at `indices` (must be contiguous, oldest-first)
    /// into one new segment, returning its bytes and descriptor-to-be.
    /// Tombstones/attributes from newer participants shadow postings from
    /// older ones; participants are ordered oldest-to-newest by convention
    /// (matching `indices`' order in the segment set).
    pub fn merge(&self, indices: &[usize]) -> Result<(Vec<u8>, u64, u64)> {
        let participants: Vec<&SegmentEntry> = indices.iter().map(|&i| &self.entries[i]).collect();
        merge_segments(&participants)
    }
}

/// Streaming k-way merge over already-sorted `Segment::all_postings()`
/// results, honoring newest-wins tombstone/attribute shadowing.
/// `participants` must be ordered oldest-first, matching `SegmentSet`.
fn merge_segments(participants: &[&SegmentEntry]) -> Result<(Vec<u8>, u64, u64)> {
    if participants.is_empty() {
        return Ok((SegmentWriter::new(0, 0).build(), 0, 0));
    }

    let first_version = participants.iter().map(|p| p.descriptor.first_version).min().unwrap();
    let last_version = participants.iter().map(|p| p.descriptor.last_version).max().unwrap();

    // A posting from participant at position `p` is shadowed if any
    // participant at position > p (newer) tombstones its doc id.
    let mut newer_tombstones: Vec<std::collections::HashSet<DocId>> =
        vec![Default::default(); participants.len()];
    {
        let mut running: std::collections::HashSet<DocId> = Default::default();
        for p in (0..participants.len()).rev() {
            newer_tombstones[p] = running.clone();
            for t in participants[p].segment.tombstones()? {
                running.insert(t);
            }
        }
    }

    // Doc ids that were re-inserted (not just deleted) by a newer
    // participant also shadow the older posting; approximate this by
    // building, per participant, the set of doc ids any *newer*
    // participant has postings for at all — if a newer segment has any
    // posting for `id`, its hash set fully replaced the older one, so the
    // older entries for `id` are stale and must be dropped.
    let mut newer_doc_ids: Vec<std::collections::HashSet<DocId>> =
        vec![Default::default(); participants.len()];
    {
        let mut running: std::collections::HashSet<DocId> = Default::default();
        for p in (0..participants.len()).rev() {
            newer_doc_ids[p] = running.clone();
            for &(_, id) in &participants[p].segment.all_postings()? {
                running.insert(id);
            }
        }
    }

    let streams: Vec<Vec<Posting>> =
        participants.iter().map(|p| p.segment.all_postings()).collect::<Result<_>>()?;

    let merged = k_way_merge_filtered(&streams, &newer_tombstones, &newer_doc_ids);

    // Tombstones retained: union of all participants' tombstones for doc
    // ids that might still be referenced by an older, non-participating
    // segment. We conservatively retain every tombstone seen among the
    // merge participants — an outer, non-participating older segment may
    // still carry postings for that doc id and must keep being shadowed.
    let mut tombstones: Vec<DocId> = Vec::new();
    for p in participants {
        tombstones.extend(p.segment.tombstones()?);
    }
    tombstones.sort_unstable();
    tombstones.dedup();

    // Attributes: newest participant wins per key.
    let mut attributes = AttributeMap::new();
    for p in participants {
        for (k, v) in p.segment.attributes()? {
            attributes.insert(k, v);
        }
    }

    let num_postings = merged.len() as u64;
    let bytes = SegmentWriter::new(first_version, last_version)
        .with_postings(merged)
        .with_tombstones(tombstones)
        .with_attributes(attributes)
        .build();
    Ok((bytes, num_postings, last_version - first_version))
}

/// Merge `streams` (each individually sorted by `(Hash, DocId)`), dropping
/// any posting whose doc id is shadowed by a strictly newer participant —
/// either because that participant tombstoned it or because it holds any
/// posting for that doc id at all (meaning it fully replaced the hash set).
fn k_way_merge_filtered(
    streams: &[Vec<Posting>],
    newer_tombstones: &[std::collections::HashSet<DocId>],
    newer_doc_ids: &[std::collections::HashSet<DocId>],
) -> Vec<Posting> {
    #[derive(Eq, PartialEq)]
    struct HeapItem {
        posting: Posting,
        stream: usize,
        index: usize,
    }
    impl Ord for HeapItem {
        fn cmp(&self, other: &Self) -> Ordering {
            // BinaryHeap is a max-heap; reverse for ascending pop order.
            other.posting.cmp(&self.posting)
        }
    }
    impl PartialOrd for HeapItem {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }

    let mut heap = BinaryHeap::new();
    for (s, stream) in streams.iter().enumerate() {
        if let Some(&posting) = stream.first() {
            heap.push(HeapItem { posting, stream: s, index: 0 });
        }
    }

    let mut out = Vec::new();
    while let Some(HeapItem { posting, stream, index }) = heap.pop() {
        let (_, doc_id) = posting;
        let shadowed =
            newer_tombstones[stream].contains(&doc_id) || newer_doc_ids[stream].contains(&doc_id);
        if !shadowed {
            out.push(posting);
        }
        if let Some(&next) = streams[stream].get(index + 1) {
            heap.push(HeapItem { posting: next, stream, index: index + 1 });
        }
    }
    out.dedup();
    out
}
