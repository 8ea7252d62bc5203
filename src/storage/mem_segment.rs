//! In-RAM counterpart of [`crate::storage::segment::Segment`] (§4.3).
//!
//! Produced by [`crate::storage::stage::Stage::freeze`]. Exposes the same
//! logical operations as a file segment — `scan`, `contains`, and
//! `attributes` — over a sorted in-memory posting buffer, and can be
//! serialized to a segment file's byte layout via [`MemorySegment::to_segment_bytes`].

use std::collections::BTreeSet;

use crate::storage::segment::{AttributeMap, Segment, SegmentWriter};
use crate::storage::types::{DocId, Hash, Posting, Version};

#[derive(Debug, Clone, Default)]
pub struct MemorySegment {
    /// Sorted by `(Hash, DocId)`.
    postings: Vec<Posting>,
    tombstones: BTreeSet<DocId>,
    attributes: AttributeMap,
    first_version: Version,
    last_version: Version,
}

impl MemorySegment {
    pub fn new(
        mut postings: Vec<Posting>,
        tombstones: BTreeSet<DocId>,
        attributes: AttributeMap,
        first_version: Version,
        last_version: Version,
    ) -> Self {
        postings.sort_unstable();
        postings.dedup();
        Self { postings, tombstones, attributes, first_version, last_version }
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty() && self.tombstones.is_empty()
    }

    pub fn version_range(&self) -> (Version, Version) {
        (self.first_version, self.last_version)
    }

    pub fn num_postings(&self) -> usize {
        self.postings.len()
    }

    /// All postings with the given hash, ascending by `DocId`.
    pub fn scan(&self, query: Hash) -> Vec<DocId> {
        let start = self.postings.partition_point(|&(h, _)| h < query);
        self.postings[start..]
            .iter()
            .take_while(|&&(h, _)| h == query)
            .map(|&(_, id)| id)
            .collect()
    }

    pub fn contains_tombstone(&self, doc_id: DocId) -> bool {
        self.tombstones.contains(&doc_id)
    }

    pub fn tombstones(&self) -> &BTreeSet<DocId> {
        &self.tombstones
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub fn postings(&self) -> &[Posting] {
        &self.postings
    }

    /// Serialize to the on-disk segment file layout (§4.2).
    pub fn to_segment_bytes(&self) -> Vec<u8> {
        SegmentWriter::new(self.first_version, self.last_version)
            .with_postings(self.postings.clone())
            .with_tombstones(self.tombstones.iter().copied().collect())
            .with_attributes(self.attributes.clone())
            .build()
    }

    /// Round-trip through the on-disk byte layout, producing a `Segment`
    /// reader. Used by the checkpointer after serializing to disk, and by
    /// tests that want to exercise the read path without touching a file.
    pub fn into_segment(&self) -> crate::error::Result<Segment> {
        Segment::from_owned_bytes(self.to_segment_bytes())
    }
}
