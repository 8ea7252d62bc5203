//! Background checkpoint pipeline (§4.8): freeze the stage, serialize it
//! to a segment file, publish a manifest that includes it, truncate the
//! oplog, and give the merge policy a chance to run.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{info, warn};

use crate::error::Result;
use crate::storage::manifest::{self, Manifest};
use crate::storage::mem_segment::MemorySegment;
use crate::storage::oplog::Oplog;
use crate::storage::segment::Segment;
use crate::storage::segment_set::{SegmentEntry, SegmentSet};
use crate::storage::types::SegmentDescriptor;

/// Allocates monotonically increasing segment and manifest numbers for one
/// index, shared between the checkpointer and the merge task.
#[derive(Default)]
pub struct IdAllocator {
    next_segment_id: AtomicU64,
    next_manifest_number: AtomicU64,
}

impl IdAllocator {
    pub fn resume_from(max_segment_id: u64, max_manifest_number: u64) -> Self {
        Self {
            next_segment_id: AtomicU64::new(max_segment_id + 1),
            next_manifest_number: AtomicU64::new(max_manifest_number + 1),
        }
    }

    pub fn next_segment_id(&self) -> u64 {
        self.next_segment_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_manifest_number(&self) -> u64 {
        self.next_manifest_number.fetch_add(1, Ordering::SeqCst)
    }
}

fn descriptor_for(segment: &Segment, segment_id: u64, file_size: u64) -> SegmentDescriptor {
    let (first_version, last_version) = segment.version_range();
    let (min_doc_id, max_doc_id) = segment.doc_id_range();
    SegmentDescriptor {
        segment_id,
        first_version,
        last_version,
        min_doc_id,
        max_doc_id,
        num_docs: segment.num_docs(),
        num_postings: segment.num_postings(),
        file_size,
        checksum: 0,
    }
}

/// Write `frozen` to `<index_dir>/<segment_id>.seg` and return its reader
/// plus descriptor. A crash between this write and the manifest publish
/// that references it leaves a stray file — cleaned up on next open by
/// [`crate::storage::index::Index::open`] deleting segments absent from
/// the current manifest.
pub fn serialize_segment(
    index_dir: &Path,
    segment_id: u64,
    frozen: &MemorySegment,
) -> Result<SegmentEntry> {
    let bytes = frozen.to_segment_bytes();
    let path = index_dir.join(format!("{segment_id}.seg"));
    std::fs::write(&path, &bytes)?;
    let file_size = bytes.len() as u64;
    let segment = Segment::from_owned_bytes(bytes)?;
    let descriptor = descriptor_for(&segment, segment_id, file_size);
    Ok(SegmentEntry { descriptor, segment })
}

/// Run one checkpoint: freeze `stage`, serialize it, publish a new
/// manifest inserting it at the newest position in `current_set`, then
/// truncate the oplog. Returns the new `SegmentSet` and the manifest
/// number just published; the caller is responsible for swapping the
/// live segment set pointer and replacing the stage with a fresh one
/// starting at `frozen.last_version + 1`.
pub fn checkpoint(
    index_dir: &Path,
    ids: &IdAllocator,
    oplog: &mut Oplog,
    current_set: &SegmentSet,
    frozen: MemorySegment,
) -> Result<(SegmentSet, u64)> {
    if frozen.is_empty() {
        info!("checkpoint skipped: frozen stage has no changes");
        return Err(crate::error::IndexError::BadRequest("nothing to checkpoint".into()));
    }

    let segment_id = ids.next_segment_id();
    let new_entry = serialize_segment(index_dir, segment_id, &frozen)?;
    let new_last_version = new_entry.descriptor.last_version;

    let mut entries: Vec<SegmentEntry> = Vec::with_capacity(current_set.len() + 1);
    for e in current_set.entries() {
        entries.push(SegmentEntry {
            descriptor: e.descriptor.clone(),
            segment: Segment::open(&index_dir.join(e.descriptor.file_name()))?,
        });
    }
    entries.push(new_entry);

    let descriptors: Vec<SegmentDescriptor> = entries.iter().map(|e| e.descriptor.clone()).collect();
    let manifest_number = ids.next_manifest_number();
    let manifest = Manifest::new(new_last_version, descriptors);
    manifest::publish(index_dir, manifest_number, &manifest)?;

    if let Err(e) = oplog.truncate_before(frozen.version_range().0) {
        warn!(error = %e, "oplog truncation after checkpoint failed; will retry on next checkpoint");
    }

    Ok((SegmentSet::new(entries), manifest_number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::Posting;
    use std::collections::BTreeSet;

    #[test]
    fn checkpoint_publishes_segment_and_advances_manifest() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut oplog = Oplog::open(dir.path(), 1024 * 1024, true).unwrap();
        let ids = IdAllocator::default();
        let empty_set = SegmentSet::default();

        let postings: Vec<Posting> = vec![(1, 1), (2, 2)];
        let frozen = MemorySegment::new(
            postings,
            BTreeSet::new(),
            Default::default(),
            1,
            2,
        );

        let (new_set, manifest_number) =
            checkpoint(dir.path(), &ids, &mut oplog, &empty_set, frozen).unwrap();

        assert_eq!(new_set.len(), 1);
        assert_eq!(manifest_number, 1);
        let manifest = manifest::read_manifest(dir.path(), 1).unwrap();
        assert_eq!(manifest.segments.len(), 1);
        assert_eq!(manifest.index_version(), 2);
    }

    #[test]
    fn checkpoint_of_empty_stage_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut oplog = Oplog::open(dir.path(), 1024 * 1024, true).unwrap();
        let ids = IdAllocator::default();
        let empty_set = SegmentSet::default();
        let frozen = MemorySegment::default();
        assert!(checkpoint(dir.path(), &ids, &mut oplog, &empty_set, frozen).is_err());
    }
}
