//! Core data model: `DocId`, `Hash`, `Version`, `Change`, `UpdateBatch`,
//! and the on-disk format constants shared by the segment, oplog, and
//! manifest modules.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Client-chosen, unique-within-an-index document identifier.
pub type DocId = u32;

/// A single 32-bit feature of a fingerprint.
pub type Hash = u32;

/// Monotonically increasing per-index batch counter.
pub type Version = u64;

/// Logical `(Hash, DocId)` pair — the fundamental unit stored in a segment.
pub type Posting = (Hash, DocId);

/// A single change within an `UpdateBatch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    /// Replace any prior state of `id` with the given hash multiset.
    Insert { id: DocId, hashes: Vec<Hash> },
    /// Remove `id` entirely.
    Delete { id: DocId },
    /// Write a named integer attribute at the index level.
    SetAttribute { name: String, value: i64 },
}

/// A batch of changes applied atomically, advancing the index version by one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBatch {
    pub changes: Vec<Change>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<Version>,
}

/// Upper bound (inclusive) of the `DocId` space, per §6.1.
pub const MAX_DOC_ID: u64 = u32::MAX as u64;

/// Validate a doc id is within `[0, 2^32 - 1]`. DocId is already a `u32`
/// so this only rejects ids supplied as a wider integer over the wire
/// (e.g. a JSON number that doesn't fit in 32 bits).
pub fn validate_doc_id(id: u64) -> crate::error::Result<DocId> {
    if id > MAX_DOC_ID {
        return Err(crate::error::IndexError::FingerprintIdOutOfRange(id));
    }
    Ok(id as DocId)
}

// ── Segment file format constants (§4.2) ────────────────────────────

/// Segment file magic, written in both header and footer.
pub const SEGMENT_MAGIC: [u8; 4] = *b"IDX1";

/// Segment file format version.
pub const SEGMENT_FORMAT_VERSION: u16 = 1;

/// Fixed-size segment header, in bytes.
pub const SEGMENT_HEADER_SIZE: usize = 80;

/// Fixed-size segment footer, in bytes: magic(4) + header_offset(8) + whole_file_crc32c(4).
pub const SEGMENT_FOOTER_SIZE: usize = 16;

/// Number of postings stored per on-disk block (§4.2 item 2).
pub const DEFAULT_BLOCK_SIZE: u32 = 128;

/// Alignment (bytes) blocks are padded to for mmap-friendly scan.
pub const BLOCK_ALIGNMENT: usize = 4096;

// ── Manifest format constants (§4.7) ────────────────────────────────

/// Manifest header magic (`0x49445831`, ASCII-ish "IDX1" variant for manifests).
pub const MANIFEST_MAGIC: u32 = 0x4944_5831;

/// Manifest format version.
pub const MANIFEST_FORMAT_VERSION: u16 = 1;

/// Descriptor for one segment referenced by a manifest (§3 "Manifest").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub segment_id: u64,
    pub first_version: Version,
    pub last_version: Version,
    pub min_doc_id: DocId,
    pub max_doc_id: DocId,
    pub num_docs: u32,
    pub num_postings: u64,
    pub file_size: u64,
    pub checksum: u32,
}

impl SegmentDescriptor {
    pub fn version_range(&self) -> (Version, Version) {
        (self.first_version, self.last_version)
    }

    /// Path of this segment's file relative to the index directory (§6.2).
    pub fn file_name(&self) -> String {
        format!("{}.seg", self.segment_id)
    }
}
