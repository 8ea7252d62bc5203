//! Mutable write buffer accumulating changes between checkpoints (§4.5).
//!
//! Grounded in the teacher's `WriteBuffer`: an upsert-by-id in-memory
//! structure that drains into an immutable artifact on flush. Here the
//! upsert key is `DocId` and the artifact is a [`MemorySegment`] instead
//! of a columnar record batch, and postings for a replaced doc are
//! tracked per-id so a re-`Insert` never leaves its old hashes behind.

use std::collections::{BTreeSet, HashMap};

use crate::error::{IndexError, Result};
use crate::storage::mem_segment::MemorySegment;
use crate::storage::oplog::Oplog;
use crate::storage::segment::AttributeMap;
use crate::storage::types::{Change, DocId, Hash, UpdateBatch, Version};

/// Accumulates writes for the currently-open version range of an index.
pub struct Stage {
    /// Per-doc postings, source of truth while the stage is open. Indexed
    /// by `DocId` so a re-`Insert` can drop the previous hash set in O(1)
    /// amortized instead of scanning a flat buffer (§4.5's "side table").
    doc_postings: HashMap<DocId, Vec<Hash>>,
    doc_versions: HashMap<DocId, Version>,
    tombstones: BTreeSet<DocId>,
    attributes: AttributeMap,
    first_version: Version,
    last_version: Version,
    byte_size: usize,
}

/// Rough per-posting cost used to drive checkpoint-size triggers: 4 bytes
/// hash + 4 bytes doc id, ignoring map overhead.
const BYTES_PER_POSTING: usize = 8;

impl Stage {
    pub fn new(first_version: Version) -> Self {
        Self {
            doc_postings: HashMap::new(),
            doc_versions: HashMap::new(),
            tombstones: BTreeSet::new(),
            attributes: AttributeMap::new(),
            first_version,
            last_version: first_version.saturating_sub(1),
            byte_size: 0,
        }
    }

    pub fn first_version(&self) -> Version {
        self.first_version
    }

    pub fn last_version(&self) -> Version {
        self.last_version
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn is_empty(&self) -> bool {
        self.doc_postings.is_empty() && self.tombstones.is_empty() && self.attributes.is_empty()
    }

    /// Apply `batch` as `new_version`, appending it to `oplog` first so the
    /// change is durable before it becomes visible in memory. `current_version`
    /// is the index's version at the time of the call, used to validate
    /// `expected_version` (optimistic concurrency, §6.1).
    pub fn apply(
        &mut self,
        oplog: &mut Oplog,
        batch: UpdateBatch,
        new_version: Version,
        current_version: Version,
    ) -> Result<()> {
        if let Some(expected) = batch.expected_version {
            if expected != current_version {
                return Err(IndexError::VersionMismatch { expected, current: current_version });
            }
        }

        oplog.append(new_version, &batch)?;

        for change in &batch.changes {
            match change {
                Change::Insert { id, hashes } => {
                    self.remove_doc_postings(*id);
                    self.byte_size += hashes.len() * BYTES_PER_POSTING;
                    self.doc_postings.insert(*id, hashes.clone());
                    self.doc_versions.insert(*id, new_version);
                    self.tombstones.remove(id);
                }
                Change::Delete { id } => {
                    self.remove_doc_postings(*id);
                    self.tombstones.insert(*id);
                }
                Change::SetAttribute { name, value } => {
                    self.attributes.insert(name.clone(), *value);
                }
            }
        }

        self.last_version = new_version;
        Ok(())
    }

    fn remove_doc_postings(&mut self, id: DocId) {
        if let Some(hashes) = self.doc_postings.remove(&id) {
            self.byte_size = self.byte_size.saturating_sub(hashes.len() * BYTES_PER_POSTING);
        }
        self.doc_versions.remove(&id);
    }

    /// All postings for docs with `hash` among their current hash set, in
    /// no particular order — the stage is scanned as "the newest segment"
    /// and its results are sorted by the caller alongside other segments.
    pub fn scan(&self, hash: Hash) -> Vec<DocId> {
        self.doc_postings
            .iter()
            .filter(|(_, hashes)| hashes.contains(&hash))
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn contains_tombstone(&self, id: DocId) -> bool {
        self.tombstones.contains(&id)
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    /// The version at which `id`'s current hash set was last written in
    /// this stage, if it has one (not yet flushed to a segment).
    pub fn doc_version(&self, id: DocId) -> Option<Version> {
        self.doc_versions.get(&id).copied()
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = DocId> + '_ {
        self.doc_postings.keys().copied()
    }

    pub fn num_live_docs(&self) -> usize {
        self.doc_postings.len()
    }

    /// Sort postings by `(Hash, DocId)` and produce an immutable
    /// [`MemorySegment`] covering `[first_version, last_version]`.
    pub fn freeze(&self) -> MemorySegment {
        let mut postings = Vec::new();
        for (&id, hashes) in &self.doc_postings {
            for &h in hashes {
                postings.push((h, id));
            }
        }
        postings.sort_unstable();
        MemorySegment::new(
            postings,
            self.tombstones.clone(),
            self.attributes.clone(),
            self.first_version,
            self.last_version,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn oplog(dir: &TempDir) -> Oplog {
        Oplog::open(dir.path(), 1024 * 1024, true).unwrap()
    }

    fn insert(id: DocId, hashes: &[Hash]) -> UpdateBatch {
        UpdateBatch {
            changes: vec![Change::Insert { id, hashes: hashes.to_vec() }],
            ..Default::default()
        }
    }

    #[test]
    fn insert_then_scan_finds_doc() {
        let dir = TempDir::new().unwrap();
        let mut log = oplog(&dir);
        let mut stage = Stage::new(1);
        stage.apply(&mut log, insert(1, &[10, 20]), 1, 0).unwrap();
        assert_eq!(stage.scan(10), vec![1]);
        assert_eq!(stage.scan(20), vec![1]);
        assert_eq!(stage.scan(30), Vec::<DocId>::new());
    }

    #[test]
    fn reinsert_replaces_old_hashes_entirely() {
        let dir = TempDir::new().unwrap();
        let mut log = oplog(&dir);
        let mut stage = Stage::new(1);
        stage.apply(&mut log, insert(1, &[10, 20]), 1, 0).unwrap();
        stage.apply(&mut log, insert(1, &[99]), 2, 1).unwrap();

        assert_eq!(stage.scan(10), Vec::<DocId>::new());
        assert_eq!(stage.scan(20), Vec::<DocId>::new());
        assert_eq!(stage.scan(99), vec![1]);
    }

    #[test]
    fn delete_tombstones_and_removes_postings() {
        let dir = TempDir::new().unwrap();
        let mut log = oplog(&dir);
        let mut stage = Stage::new(1);
        stage.apply(&mut log, insert(1, &[10]), 1, 0).unwrap();
        let delete = UpdateBatch { changes: vec![Change::Delete { id: 1 }], ..Default::default() };
        stage.apply(&mut log, delete, 2, 1).unwrap();

        assert_eq!(stage.scan(10), Vec::<DocId>::new());
        assert!(stage.contains_tombstone(1));
    }

    #[test]
    fn expected_version_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let mut log = oplog(&dir);
        let mut stage = Stage::new(1);
        let batch = UpdateBatch {
            changes: vec![Change::Delete { id: 1 }],
            expected_version: Some(5),
            ..Default::default()
        };
        let err = stage.apply(&mut log, batch, 1, 0).unwrap_err();
        assert!(matches!(err, IndexError::VersionMismatch { expected: 5, current: 0 }));
    }

    #[test]
    fn set_attribute_updates_map_without_touching_postings() {
        let dir = TempDir::new().unwrap();
        let mut log = oplog(&dir);
        let mut stage = Stage::new(1);
        let batch = UpdateBatch {
            changes: vec![Change::SetAttribute { name: "version".into(), value: 7 }],
            ..Default::default()
        };
        stage.apply(&mut log, batch, 1, 0).unwrap();
        assert_eq!(stage.attributes().get("version"), Some(&7));
    }

    #[test]
    fn freeze_produces_sorted_memory_segment() {
        let dir = TempDir::new().unwrap();
        let mut log = oplog(&dir);
        let mut stage = Stage::new(1);
        stage.apply(&mut log, insert(2, &[5]), 1, 0).unwrap();
        stage.apply(&mut log, insert(1, &[5]), 2, 1).unwrap();

        let frozen = stage.freeze();
        assert_eq!(frozen.scan(5), vec![1, 2]);
        assert_eq!(frozen.version_range(), (1, 2));
    }
}
