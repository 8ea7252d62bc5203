//! Immutable on-disk segment file (§4.2).
//!
//! Layout, in file order:
//!
//! ```text
//! [header: SEGMENT_HEADER_SIZE bytes]
//! [posting blocks: each `len:u32 | encode_postings(..)` ]
//! [block index: num_blocks * (first_hash:u32, file_offset:u64)]
//! [tombstone table: count:u32 | DocId*]
//! [attribute table: count:u32 | (name_len:u16, name, value:i64)*]
//! [footer: magic | header_offset:u64 | whole_file_crc32c:u32]
//! ```
//!
//! Blocks hold up to `DEFAULT_BLOCK_SIZE` postings each, sorted by
//! `(Hash, DocId)`; the block index lets a reader binary-search to the
//! first block that could contain a query hash before decoding anything.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{IndexError, Result};
use crate::storage::encoding::{decode_postings, encode_postings};
use crate::storage::types::{
    DocId, Hash, Posting, Version, BLOCK_ALIGNMENT, DEFAULT_BLOCK_SIZE, SEGMENT_FOOTER_SIZE,
    SEGMENT_FORMAT_VERSION, SEGMENT_HEADER_SIZE, SEGMENT_MAGIC,
};

fn corrupt(reason: impl Into<String>) -> IndexError {
    IndexError::CorruptSegment("<segment>".into(), reason.into())
}

#[derive(Debug, Clone, Copy)]
struct Header {
    first_version: Version,
    last_version: Version,
    min_doc_id: DocId,
    max_doc_id: DocId,
    num_docs: u32,
    num_postings: u64,
    block_size: u32,
    num_blocks: u32,
    block_index_offset: u64,
    tombstone_offset: u64,
    attribute_offset: u64,
}

impl Header {
    fn to_bytes(self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut buf = [0u8; SEGMENT_HEADER_SIZE];
        let mut w = 0;
        macro_rules! put {
            ($bytes:expr) => {{
                let b = $bytes;
                buf[w..w + b.len()].copy_from_slice(&b);
                w += b.len();
            }};
        }
        put!(SEGMENT_MAGIC);
        put!(SEGMENT_FORMAT_VERSION.to_le_bytes());
        put!(0u16.to_le_bytes()); // reserved
        put!(self.first_version.to_le_bytes());
        put!(self.last_version.to_le_bytes());
        put!(self.min_doc_id.to_le_bytes());
        put!(self.max_doc_id.to_le_bytes());
        put!(self.num_docs.to_le_bytes());
        put!(self.num_postings.to_le_bytes());
        put!(self.block_size.to_le_bytes());
        put!(self.num_blocks.to_le_bytes());
        put!(self.block_index_offset.to_le_bytes());
        put!(self.tombstone_offset.to_le_bytes());
        put!(self.attribute_offset.to_le_bytes());
        let crc = crc32c::crc32c(&buf[..w]);
        put!(crc.to_le_bytes());
        debug_assert_eq!(w, SEGMENT_HEADER_SIZE);
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < SEGMENT_HEADER_SIZE {
            return Err(corrupt("file too small for header"));
        }
        if buf[0..4] != SEGMENT_MAGIC {
            return Err(corrupt("bad magic"));
        }
        let format_version = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        if format_version != SEGMENT_FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {format_version}")));
        }
        let stored_crc = u32::from_le_bytes(buf[76..80].try_into().unwrap());
        let computed_crc = crc32c::crc32c(&buf[..76]);
        if stored_crc != computed_crc {
            return Err(corrupt("header checksum mismatch"));
        }
        Ok(Header {
            first_version: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            last_version: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            min_doc_id: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
            max_doc_id: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
            num_docs: u32::from_le_bytes(buf[32..36].try_into().unwrap()),
            num_postings: u64::from_le_bytes(buf[36..44].try_into().unwrap()),
            block_size: u32::from_le_bytes(buf[44..48].try_into().unwrap()),
            num_blocks: u32::from_le_bytes(buf[48..52].try_into().unwrap()),
            block_index_offset: u64::from_le_bytes(buf[52..60].try_into().unwrap()),
            tombstone_offset: u64::from_le_bytes(buf[60..68].try_into().unwrap()),
            attribute_offset: u64::from_le_bytes(buf[68..76].try_into().unwrap()),
        })
    }
}

/// In-memory description of a segment's attribute value, for writing.
pub type AttributeMap = std::collections::BTreeMap<String, i64>;

/// Builds a segment file from already-sorted, deduplicated inputs.
pub struct SegmentWriter {
    postings: Vec<Posting>,
    tombstones: Vec<DocId>,
    attributes: AttributeMap,
    first_version: Version,
    last_version: Version,
}

impl SegmentWriter {
    pub fn new(first_version: Version, last_version: Version) -> Self {
        Self {
            postings: Vec::new(),
            tombstones: Vec::new(),
            attributes: AttributeMap::new(),
            first_version,
            last_version,
        }
    }

    /// `postings` must already be sorted by `(Hash, DocId)` and deduplicated.
    pub fn with_postings(mut self, postings: Vec<Posting>) -> Self {
        self.postings = postings;
        self
    }

    pub fn with_tombstones(mut self, mut tombstones: Vec<DocId>) -> Self {
        tombstones.sort_unstable();
        tombstones.dedup();
        self.tombstones = tombstones;
        self
    }

    pub fn with_attributes(mut self, attributes: AttributeMap) -> Self {
        self.attributes = attributes;
        self
    }

    /// Serialize to bytes. Used both for on-disk segments and the
    /// in-memory representation produced by freezing a stage.
    pub fn build(&self) -> Vec<u8> {
        let mut body = Vec::new(); // everything after the header
        let block_size = DEFAULT_BLOCK_SIZE as usize;

        let mut block_index: Vec<(Hash, u64)> = Vec::new();
        for chunk in self.postings.chunks(block_size) {
            let first_hash = chunk[0].0;
            let offset = SEGMENT_HEADER_SIZE as u64 + body.len() as u64;
            block_index.push((first_hash, offset));

            let encoded = encode_postings(chunk);
            body.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
            body.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
            body.extend_from_slice(&encoded);
        }

        let block_index_offset = SEGMENT_HEADER_SIZE as u64 + body.len() as u64;
        for &(hash, offset) in &block_index {
            body.extend_from_slice(&hash.to_le_bytes());
            body.extend_from_slice(&offset.to_le_bytes());
        }

        let tombstone_offset = SEGMENT_HEADER_SIZE as u64 + body.len() as u64;
        body.extend_from_slice(&(self.tombstones.len() as u32).to_le_bytes());
        for &doc_id in &self.tombstones {
            body.extend_from_slice(&doc_id.to_le_bytes());
        }

        let attribute_offset = SEGMENT_HEADER_SIZE as u64 + body.len() as u64;
        body.extend_from_slice(&(self.attributes.len() as u32).to_le_bytes());
        for (name, value) in &self.attributes {
            let name_bytes = name.as_bytes();
            body.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
            body.extend_from_slice(name_bytes);
            body.extend_from_slice(&value.to_le_bytes());
        }

        let (min_doc_id, max_doc_id, num_docs) = doc_id_summary(&self.postings);

        let header = Header {
            first_version: self.first_version,
            last_version: self.last_version,
            min_doc_id,
            max_doc_id,
            num_docs,
            num_postings: self.postings.len() as u64,
            block_size: DEFAULT_BLOCK_SIZE,
            num_blocks: block_index.len() as u32,
            block_index_offset,
            tombstone_offset,
            attribute_offset,
        };

        let mut out = Vec::with_capacity(SEGMENT_HEADER_SIZE + body.len() + SEGMENT_FOOTER_SIZE);
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&body);

        out.extend_from_slice(&SEGMENT_MAGIC);
        out.extend_from_slice(&0u64.to_le_bytes()); // header always at offset 0
        let whole_file_crc = crc32c::crc32c(&out);
        out.extend_from_slice(&whole_file_crc.to_le_bytes());
        out
    }
}

fn doc_id_summary(postings: &[Posting]) -> (DocId, DocId, u32) {
    if postings.is_empty() {
        return (0, 0, 0);
    }
    let mut ids: Vec<DocId> = postings.iter().map(|&(_, id)| id).collect();
    ids.sort_unstable();
    ids.dedup();
    let min = *ids.first().unwrap();
    let max = *ids.last().unwrap();
    (min, max, ids.len() as u32)
}

/// Backing storage for an opened segment: either an owned byte buffer
/// (used for freshly-built in-memory segments, or in tests) or a
/// memory-mapped file.
enum Bytes {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl std::ops::Deref for Bytes {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            Bytes::Owned(v) => v,
            Bytes::Mapped(m) => m,
        }
    }
}

/// A read-only handle onto one immutable segment file.
pub struct Segment {
    bytes: Bytes,
    header: Header,
    block_index: Vec<(Hash, u64)>,
}

impl Segment {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_bytes(Bytes::Mapped(mmap))
    }

    pub fn from_owned_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_bytes(Bytes::Owned(bytes))
    }

    fn from_bytes(bytes: Bytes) -> Result<Self> {
        if bytes.len() < SEGMENT_HEADER_SIZE + SEGMENT_FOOTER_SIZE {
            return Err(corrupt("file too small"));
        }
        let footer_start = bytes.len() - SEGMENT_FOOTER_SIZE;
        if bytes[footer_start..footer_start + 4] != SEGMENT_MAGIC {
            return Err(corrupt("bad footer magic"));
        }
        let stored_whole_crc =
            u32::from_le_bytes(bytes[footer_start + 12..footer_start + 16].try_into().unwrap());
        let computed_whole_crc = crc32c::crc32c(&bytes[..footer_start + 12]);
        if stored_whole_crc != computed_whole_crc {
            return Err(corrupt("whole-file checksum mismatch"));
        }

        let header = Header::from_bytes(&bytes[..SEGMENT_HEADER_SIZE])?;

        let mut block_index = Vec::with_capacity(header.num_blocks as usize);
        let mut pos = header.block_index_offset as usize;
        for _ in 0..header.num_blocks {
            let hash = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
            let offset = u64::from_le_bytes(bytes[pos + 4..pos + 12].try_into().unwrap());
            block_index.push((hash, offset));
            pos += 12;
        }

        Ok(Self { bytes, header, block_index })
    }

    pub fn version_range(&self) -> (Version, Version) {
        (self.header.first_version, self.header.last_version)
    }

    pub fn num_docs(&self) -> u32 {
        self.header.num_docs
    }

    pub fn num_postings(&self) -> u64 {
        self.header.num_postings
    }

    pub fn doc_id_range(&self) -> (DocId, DocId) {
        (self.header.min_doc_id, self.header.max_doc_id)
    }

    fn read_block(&self, file_offset: u64) -> Result<Vec<Posting>> {
        let off = file_offset as usize;
        if off + 8 > self.bytes.len() {
            return Err(corrupt("block header out of range"));
        }
        let encoded_len = u32::from_le_bytes(self.bytes[off..off + 4].try_into().unwrap()) as usize;
        let count = u32::from_le_bytes(self.bytes[off + 4..off + 8].try_into().unwrap()) as usize;
        let data_start = off + 8;
        let data_end = data_start + encoded_len;
        if data_end > self.bytes.len() {
            return Err(corrupt("block body truncated"));
        }
        decode_postings(&self.bytes[data_start..data_end], count)
    }

    /// Scan all postings with `hash == query`, in ascending `DocId` order.
    /// Binary searches the block index to the last block whose
    /// `first_hash <= query`, then decodes forward until hashes exceed it.
    pub fn scan(&self, query: Hash) -> Result<Vec<DocId>> {
        if self.block_index.is_empty() {
            return Ok(Vec::new());
        }
        let start_block = match self.block_index.binary_search_by_key(&query, |&(h, _)| h) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        };

        let mut out = Vec::new();
        for block_idx in start_block..self.block_index.len() {
            let (first_hash, offset) = self.block_index[block_idx];
            if block_idx > start_block && first_hash > query {
                break;
            }
            let postings = self.read_block(offset)?;
            let mut saw_match = false;
            let mut past = false;
            for (hash, doc_id) in postings {
                if hash == query {
                    saw_match = true;
                    out.push(doc_id);
                } else if hash > query {
                    past = true;
                    break;
                }
            }
            if past && saw_match {
                break;
            }
            if past && block_idx > start_block {
                break;
            }
        }
        Ok(out)
    }

    /// Every doc id a tombstone was written for in this segment.
    pub fn tombstones(&self) -> Result<Vec<DocId>> {
        let off = self.header.tombstone_offset as usize;
        if off + 4 > self.bytes.len() {
            return Err(corrupt("tombstone table out of range"));
        }
        let count = u32::from_le_bytes(self.bytes[off..off + 4].try_into().unwrap()) as usize;
        let mut out = Vec::with_capacity(count);
        let mut pos = off + 4;
        for _ in 0..count {
            if pos + 4 > self.bytes.len() {
                return Err(corrupt("tombstone table truncated"));
            }
            out.push(u32::from_le_bytes(self.bytes[pos..pos + 4].try_into().unwrap()));
            pos += 4;
        }
        Ok(out)
    }

    pub fn contains_tombstone(&self, doc_id: DocId) -> Result<bool> {
        Ok(self.tombstones()?.binary_search(&doc_id).is_ok())
    }

    /// Whether this segment holds any posting for `doc_id`. Used by the
    /// single-fingerprint lookup path; O(num_postings) since postings are
    /// ordered by hash, not by doc id.
    pub fn contains_doc(&self, doc_id: DocId) -> Result<bool> {
        Ok(self.all_postings()?.iter().any(|&(_, id)| id == doc_id))
    }

    pub fn attributes(&self) -> Result<AttributeMap> {
        let off = self.header.attribute_offset as usize;
        if off + 4 > self.bytes.len() {
            return Err(corrupt("attribute table out of range"));
        }
        let count = u32::from_le_bytes(self.bytes[off..off + 4].try_into().unwrap()) as usize;
        let mut out = AttributeMap::new();
        let mut pos = off + 4;
        for _ in 0..count {
            if pos + 2 > self.bytes.len() {
                return Err(corrupt("attribute table truncated"));
            }
            let name_len = u16::from_le_bytes(self.bytes[pos..pos + 2].try_into().unwrap()) as usize;
            pos += 2;
            if pos + name_len + 8 > self.bytes.len() {
                return Err(corrupt("attribute table truncated"));
            }
            let name = std::str::from_utf8(&self.bytes[pos..pos + name_len])
                .map_err(|_| corrupt("attribute name not utf8"))?
                .to_string();
            pos += name_len;
            let value = i64::from_le_bytes(self.bytes[pos..pos + 8].try_into().unwrap());
            pos += 8;
            out.insert(name, value);
        }
        Ok(out)
    }

    /// All postings, in ascending `(Hash, DocId)` order. Used by compaction.
    pub fn all_postings(&self) -> Result<Vec<Posting>> {
        let mut out = Vec::with_capacity(self.header.num_postings as usize);
        for &(_, offset) in &self.block_index {
            out.extend(self.read_block(offset)?);
        }
        Ok(out)
    }
}

/// Unused at rest today; documents the intended on-disk alignment for a
/// future page-aligned writer (posix_fadvise-friendly sequential scans).
#[allow(dead_code)]
const _: () = assert!(BLOCK_ALIGNMENT >= 4096);

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_postings() -> Vec<Posting> {
        vec![(1, 10), (1, 20), (2, 5), (2, 6), (2, 7), (5, 1), (5, 2), (9, 100)]
    }

    #[test]
    fn roundtrip_scan_finds_all_matches() {
        let postings = sample_postings();
        let bytes = SegmentWriter::new(1, 1).with_postings(postings).build();
        let seg = Segment::from_owned_bytes(bytes).unwrap();

        assert_eq!(seg.scan(2).unwrap(), vec![5, 6, 7]);
        assert_eq!(seg.scan(5).unwrap(), vec![1, 2]);
        assert_eq!(seg.scan(9).unwrap(), vec![100]);
        assert_eq!(seg.scan(42).unwrap(), Vec::<DocId>::new());
    }

    #[test]
    fn header_and_whole_file_checksum_validated() {
        let bytes = SegmentWriter::new(1, 1).with_postings(sample_postings()).build();
        let mut corrupted = bytes.clone();
        corrupted[10] ^= 0xFF;
        let err = Segment::from_owned_bytes(corrupted).unwrap_err();
        assert!(matches!(err, IndexError::CorruptSegment(_, _)));
    }

    #[test]
    fn tombstones_roundtrip() {
        let bytes = SegmentWriter::new(1, 2)
            .with_postings(sample_postings())
            .with_tombstones(vec![10, 5, 5])
            .build();
        let seg = Segment::from_owned_bytes(bytes).unwrap();
        let tombstones = seg.tombstones().unwrap();
        assert_eq!(tombstones, vec![5, 10]);
        assert!(seg.contains_tombstone(5).unwrap());
        assert!(!seg.contains_tombstone(6).unwrap());
    }

    #[test]
    fn attributes_roundtrip() {
        let mut attrs = AttributeMap::new();
        attrs.insert("max_doc_id".into(), 1000);
        attrs.insert("rev".into(), -7);
        let bytes = SegmentWriter::new(1, 1)
            .with_postings(sample_postings())
            .with_attributes(attrs.clone())
            .build();
        let seg = Segment::from_owned_bytes(bytes).unwrap();
        assert_eq!(seg.attributes().unwrap(), attrs);
    }

    #[test]
    fn doc_id_summary_and_version_range() {
        let bytes = SegmentWriter::new(3, 9).with_postings(sample_postings()).build();
        let seg = Segment::from_owned_bytes(bytes).unwrap();
        assert_eq!(seg.version_range(), (3, 9));
        assert_eq!(seg.doc_id_range(), (1, 100));
        assert_eq!(seg.num_docs(), 6);
        assert_eq!(seg.num_postings(), 8);
    }

    #[test]
    fn empty_segment_scans_empty() {
        let bytes = SegmentWriter::new(1, 1).with_postings(Vec::new()).build();
        let seg = Segment::from_owned_bytes(bytes).unwrap();
        assert_eq!(seg.scan(1).unwrap(), Vec::<DocId>::new());
        assert_eq!(seg.all_postings().unwrap(), Vec::new());
    }

    #[test]
    fn multi_block_scan_spans_blocks() {
        // Force more than one block by exceeding DEFAULT_BLOCK_SIZE postings.
        let mut postings = Vec::new();
        for h in 0..300u32 {
            postings.push((h, h));
        }
        let bytes = SegmentWriter::new(1, 1).with_postings(postings.clone()).build();
        let seg = Segment::from_owned_bytes(bytes).unwrap();
        assert_eq!(seg.scan(250).unwrap(), vec![250]);
        assert_eq!(seg.all_postings().unwrap(), postings);
    }
}
