//! Per-index lifecycle: open, create, delete, and the write/search/snapshot
//! entry points a single named index exposes to the registry (§4.11).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::error::{IndexError, Result};
use crate::metrics::Metrics;
use crate::storage::checkpoint::{self, IdAllocator};
use crate::storage::manifest::{self, Manifest};
use crate::storage::oplog::Oplog;
use crate::storage::searcher::{search, SearchResult};
use crate::storage::segment::Segment;
use crate::storage::segment::AttributeMap;
use crate::storage::segment_set::{MergePolicyConfig, SegmentEntry, SegmentSet};
use crate::storage::stage::Stage;
use crate::storage::types::{DocId, SegmentDescriptor, UpdateBatch, Version};

/// State machine of an index (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Creating,
    Active,
    Deleting,
    Deleted,
}

/// Summary returned by `GET /{index}` (§6.1).
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub version: Version,
    pub min_doc_id: DocId,
    pub max_doc_id: DocId,
    pub num_segments: usize,
    pub num_docs: u64,
    pub attributes: AttributeMap,
}

/// One open, named fingerprint index: oplog + stage (mutable) guarded by
/// a single writer mutex, plus a segment set readers see via a snapshot.
/// Matches the teacher's `Database` wrapping a lockable engine behind a
/// registry-held `Arc`.
pub struct Index {
    dir: PathBuf,
    state: Mutex<IndexState>,
    writer: Mutex<WriterState>,
    segments: std::sync::RwLock<SegmentSet>,
    ids: IdAllocator,
    current_manifest_number: AtomicU64,
    checkpoint_bytes_threshold: usize,
    merge_policy: MergePolicyConfig,
    metrics: Arc<Metrics>,
}

struct WriterState {
    stage: Stage,
    oplog: Oplog,
    current_version: Version,
}

impl Index {
    /// Write an initial empty manifest at version 0 for a brand-new index.
    pub fn create(dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let manifest = Manifest::new(0, Vec::new());
        manifest::publish(dir, 0, &manifest)?;
        Ok(())
    }

    /// Open an existing index directory, replaying the oplog tail and
    /// discarding orphaned segment files (§4.11 "Open").
    pub fn open(
        dir: &Path,
        checkpoint_bytes_threshold: usize,
        merge_policy: MergePolicyConfig,
        parallel_load_threshold: usize,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let started_at = Instant::now();
        let manifest_number = manifest::highest_manifest_number(dir)?
            .ok_or_else(|| IndexError::CorruptSegment(dir.display().to_string(), "no manifest found".into()))?;
        let manifest = manifest::read_manifest(dir, manifest_number)?;

        let entries = load_segments(dir, &manifest.segments, parallel_load_threshold)?;
        delete_orphan_segments(dir, &manifest.segments)?;
        metrics.record_segment_load(manifest.segments.len() >= parallel_load_threshold, manifest.segments.len());

        let newest_segment_version = manifest.segments.iter().map(|s| s.last_version).max().unwrap_or(0);
        let replay_from = if manifest.segments.is_empty() { 0 } else { newest_segment_version + 1 };

        let rotate_threshold = 64 * 1024 * 1024;
        let mut oplog = Oplog::open(dir, rotate_threshold, true)?;
        let tail = oplog.iter_from(replay_from)?;

        let mut stage = Stage::new(replay_from);
        let mut current_version = manifest.index_version();
        for (version, batch) in tail {
            // Replay does not re-check expected_version: these batches
            // already passed that check once, durably, before the crash.
            stage.apply(&mut oplog, batch, version, current_version)?;
            current_version = version;
        }

        let max_segment_id = manifest.segments.iter().map(|s| s.segment_id).max().unwrap_or(0);
        let ids = IdAllocator::resume_from(max_segment_id, manifest_number);

        metrics.record_startup_duration(started_at.elapsed().as_secs_f64());

        Ok(Self {
            dir: dir.to_path_buf(),
            state: Mutex::new(IndexState::Active),
            writer: Mutex::new(WriterState { stage, oplog, current_version }),
            segments: std::sync::RwLock::new(SegmentSet::new(entries)),
            ids,
            current_manifest_number: AtomicU64::new(manifest_number),
            checkpoint_bytes_threshold,
            merge_policy,
            metrics,
        })
    }

    pub fn state(&self) -> IndexState {
        *self.state.lock().unwrap()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state() != IndexState::Active {
            return Err(IndexError::IndexNotFound(self.dir.display().to_string()));
        }
        Ok(())
    }

    /// Apply an update batch, checkpointing if the stage has grown past
    /// the configured size threshold.
    pub fn apply(&self, batch: UpdateBatch) -> Result<Version> {
        self.ensure_active()?;
        if batch.changes.is_empty() && batch.metadata.is_none() {
            return Err(IndexError::BadRequest("batch must carry changes or metadata".into()));
        }
        let mut w = self.writer.lock().unwrap();
        let new_version = w.current_version + 1;
        w.stage.apply(&mut w.oplog, batch, new_version, w.current_version)?;
        w.current_version = new_version;

        let mut did_checkpoint = false;
        if w.stage.byte_size() >= self.checkpoint_bytes_threshold {
            let frozen = w.stage.freeze();
            let fresh_first_version = frozen.version_range().1 + 1;
            drop(std::mem::replace(&mut w.stage, Stage::new(fresh_first_version)));

            let segments = self.segments.read().unwrap();
            match checkpoint::checkpoint(&self.dir, &self.ids, &mut w.oplog, &segments, frozen) {
                Ok((new_set, manifest_number)) => {
                    drop(segments);
                    *self.segments.write().unwrap() = new_set;
                    self.current_manifest_number.store(manifest_number, Ordering::SeqCst);
                    did_checkpoint = true;
                    self.metrics.record_checkpoint();
                }
                Err(e) => warn!(error = %e, "checkpoint failed; stage already rotated, change is durable in oplog"),
            }
        }

        // Drop the writer lock before merging: merge only touches the
        // segment set and manifest, not the stage or oplog, and must not
        // try to re-acquire the writer mutex we're still holding here.
        let current_version = w.current_version;
        drop(w);
        if did_checkpoint {
            self.maybe_schedule_merge(current_version)?;
        }

        Ok(new_version)
    }

    fn maybe_schedule_merge(&self, current_version: Version) -> Result<()> {
        let segments = self.segments.read().unwrap();
        let Some(candidate) = segments.find_merge_candidate(self.merge_policy) else {
            return Ok(());
        };
        let (bytes, num_postings, _) = segments.merge(&candidate)?;
        let merged_segment_id = self.ids.next_segment_id();
        let merged_segment = Segment::from_owned_bytes(bytes.clone())?;
        let (first_version, last_version) = merged_segment.version_range();
        let (min_doc_id, max_doc_id) = merged_segment.doc_id_range();
        let descriptor = SegmentDescriptor {
            segment_id: merged_segment_id,
            first_version,
            last_version,
            min_doc_id,
            max_doc_id,
            num_docs: merged_segment.num_docs(),
            num_postings,
            file_size: bytes.len() as u64,
            checksum: 0,
        };
        let path = self.dir.join(descriptor.file_name());
        std::fs::write(&path, &bytes)?;

        let mut new_entries: Vec<SegmentEntry> = Vec::new();
        for (i, e) in segments.entries().iter().enumerate() {
            if candidate.contains(&i) {
                continue;
            }
            new_entries.push(SegmentEntry {
                descriptor: e.descriptor.clone(),
                segment: Segment::open(&self.dir.join(e.descriptor.file_name()))?,
            });
        }
        // Insert the merged segment at the position of its oldest participant
        // to preserve the oldest-first ordering invariant.
        let insert_at = candidate.iter().min().copied().unwrap_or(new_entries.len()).min(new_entries.len());
        new_entries.insert(insert_at, SegmentEntry { descriptor: descriptor.clone(), segment: merged_segment });

        let old_paths: Vec<PathBuf> = candidate
            .iter()
            .map(|&i| self.dir.join(segments.entries()[i].descriptor.file_name()))
            .collect();
        let old_manifest_number = self.current_manifest_number.load(Ordering::SeqCst);

        let descriptors: Vec<SegmentDescriptor> = new_entries.iter().map(|e| e.descriptor.clone()).collect();
        let manifest_number = self.ids.next_manifest_number();
        let manifest = Manifest::new(current_version, descriptors);
        drop(segments);
        manifest::publish(&self.dir, manifest_number, &manifest)?;
        // Acquiring the write lock above already waited for any in-flight
        // readers holding a read guard over the old segment set, so the
        // superseded files have no remaining borrowers (§5's borrow-token
        // contract, implemented here via RwLock instead of a refcount).
        *self.segments.write().unwrap() = SegmentSet::new(new_entries);
        self.current_manifest_number.store(manifest_number, Ordering::SeqCst);
        manifest::delete_manifest(&self.dir, old_manifest_number)?;
        for path in old_paths {
            let _ = std::fs::remove_file(path);
        }

        info!(merged = merged_segment_id, participants = candidate.len(), "merged segments");
        self.metrics.record_merge();
        Ok(())
    }

    /// Search for the top-`limit` docs matching `query`, bounded by `timeout`.
    pub fn search(&self, query: &[u32], limit: u32, timeout: Duration) -> Result<SearchResult> {
        self.ensure_active()?;
        let w = self.writer.lock().unwrap();
        let segments = self.segments.read().unwrap();
        Ok(search(&w.stage, &segments, query, limit, timeout))
    }

    pub fn current_version(&self) -> Version {
        self.writer.lock().unwrap().current_version
    }

    pub fn current_manifest_number(&self) -> u64 {
        self.current_manifest_number.load(Ordering::SeqCst)
    }

    /// Summary stats for `GET /{index}` (§6.1).
    pub fn stats(&self) -> IndexStats {
        let w = self.writer.lock().unwrap();
        let segments = self.segments.read().unwrap();

        let mut min_doc_id = u32::MAX;
        let mut max_doc_id = 0u32;
        let mut num_docs = 0u64;
        for e in segments.entries() {
            min_doc_id = min_doc_id.min(e.descriptor.min_doc_id);
            max_doc_id = max_doc_id.max(e.descriptor.max_doc_id);
            num_docs += e.descriptor.num_docs as u64;
        }
        for id in w.stage.doc_ids() {
            min_doc_id = min_doc_id.min(id);
            max_doc_id = max_doc_id.max(id);
        }
        num_docs += w.stage.num_live_docs() as u64;
        if min_doc_id > max_doc_id {
            min_doc_id = 0;
            max_doc_id = 0;
        }

        IndexStats {
            version: w.current_version,
            min_doc_id,
            max_doc_id,
            num_segments: segments.len(),
            num_docs,
            attributes: w.stage.attributes().clone(),
        }
    }

    /// The version a single fingerprint was last written at, if it is
    /// currently live (not deleted). Checks the stage, then segments
    /// newest-first, honoring tombstone shadowing.
    pub fn fingerprint_version(&self, doc_id: DocId) -> Result<Option<Version>> {
        self.ensure_active()?;
        let w = self.writer.lock().unwrap();
        if w.stage.contains_tombstone(doc_id) {
            return Ok(None);
        }
        if let Some(version) = w.stage.doc_version(doc_id) {
            return Ok(Some(version));
        }

        let segments = self.segments.read().unwrap();
        for entry in segments.entries().iter().rev() {
            if entry.segment.contains_tombstone(doc_id)? {
                return Ok(None);
            }
            if entry.segment.contains_doc(doc_id)? {
                return Ok(Some(entry.descriptor.last_version));
            }
        }
        Ok(None)
    }

    /// Stream a point-in-time tar snapshot of the current manifest,
    /// referenced segments, and the oplog tail needed to reach the current
    /// version (§4.10).
    pub fn write_snapshot<W: std::io::Write>(&self, writer: W) -> Result<()> {
        self.ensure_active()?;
        let w = self.writer.lock().unwrap();
        let segments = self.segments.read().unwrap();

        let manifest_number = self.current_manifest_number();
        let manifest = manifest::read_manifest(&self.dir, manifest_number)?;
        let manifest_bytes = manifest.to_bytes()?;
        let oplog_tail_paths = w.oplog.file_paths();
        drop(segments);

        crate::storage::snapshot::write_snapshot(writer, &manifest_bytes, &manifest, &self.dir, &oplog_tail_paths)
    }

    /// Mark the index as quiescing and remove its directory. Callers
    /// (the registry) are responsible for waiting out in-flight requests
    /// before invoking this.
    pub fn delete(&self, data_root: &Path, name: &str) -> Result<()> {
        *self.state.lock().unwrap() = IndexState::Deleting;
        std::fs::remove_dir_all(data_root.join(name))?;
        *self.state.lock().unwrap() = IndexState::Deleted;
        Ok(())
    }
}

fn load_segments(dir: &Path, descriptors: &[SegmentDescriptor], parallel_load_threshold: usize) -> Result<Vec<SegmentEntry>> {
    if descriptors.len() >= parallel_load_threshold {
        descriptors
            .par_iter()
            .map(|d| {
                let segment = Segment::open(&dir.join(d.file_name()))?;
                Ok(SegmentEntry { descriptor: d.clone(), segment })
            })
            .collect()
    } else {
        descriptors
            .iter()
            .map(|d| {
                let segment = Segment::open(&dir.join(d.file_name()))?;
                Ok(SegmentEntry { descriptor: d.clone(), segment })
            })
            .collect()
    }
}

fn delete_orphan_segments(dir: &Path, descriptors: &[SegmentDescriptor]) -> Result<()> {
    let known: std::collections::HashSet<String> = descriptors.iter().map(|d| d.file_name()).collect();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.ends_with(".seg") && !known.contains(name) {
            warn!(file = name, "deleting orphan segment not referenced by current manifest");
            let _ = std::fs::remove_file(entry.path());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::{Change, UpdateBatch};

    fn insert(id: u32, hashes: &[u32]) -> UpdateBatch {
        UpdateBatch { changes: vec![Change::Insert { id, hashes: hashes.to_vec() }], ..Default::default() }
    }

    #[test]
    fn create_then_open_gives_empty_active_index() {
        let dir = tempfile::TempDir::new().unwrap();
        Index::create(dir.path()).unwrap();
        let index = Index::open(dir.path(), 8 * 1024 * 1024, MergePolicyConfig::default(), 2, Arc::new(Metrics::new())).unwrap();
        assert_eq!(index.state(), IndexState::Active);
        assert_eq!(index.current_version(), 0);
    }

    #[test]
    fn apply_then_search_finds_doc() {
        let dir = tempfile::TempDir::new().unwrap();
        Index::create(dir.path()).unwrap();
        let index = Index::open(dir.path(), 8 * 1024 * 1024, MergePolicyConfig::default(), 2, Arc::new(Metrics::new())).unwrap();

        index.apply(insert(1, &[10, 20])).unwrap();
        let result = index.search(&[10], 40, Duration::from_millis(500)).unwrap();
        assert_eq!(result.hits[0].id, 1);
    }

    #[test]
    fn checkpoint_triggers_past_byte_threshold_and_reopen_preserves_data() {
        let dir = tempfile::TempDir::new().unwrap();
        Index::create(dir.path()).unwrap();
        {
            let index = Index::open(dir.path(), 16, MergePolicyConfig::default(), 2, Arc::new(Metrics::new())).unwrap();
            index.apply(insert(1, &[10, 20, 30])).unwrap(); // exceeds 16-byte threshold
            index.apply(insert(2, &[40])).unwrap();
        }

        let reopened = Index::open(dir.path(), 16, MergePolicyConfig::default(), 2, Arc::new(Metrics::new())).unwrap();
        let result = reopened.search(&[10], 40, Duration::from_millis(500)).unwrap();
        assert_eq!(result.hits[0].id, 1);
        let result2 = reopened.search(&[40], 40, Duration::from_millis(500)).unwrap();
        assert_eq!(result2.hits[0].id, 2);
    }

    #[test]
    fn fingerprint_version_tracks_stage_then_segment() {
        let dir = tempfile::TempDir::new().unwrap();
        Index::create(dir.path()).unwrap();
        let index = Index::open(dir.path(), 8 * 1024 * 1024, MergePolicyConfig::default(), 2, Arc::new(Metrics::new())).unwrap();

        assert_eq!(index.fingerprint_version(1).unwrap(), None);
        index.apply(insert(1, &[10])).unwrap();
        assert_eq!(index.fingerprint_version(1).unwrap(), Some(1));

        let delete = UpdateBatch { changes: vec![Change::Delete { id: 1 }], ..Default::default() };
        index.apply(delete).unwrap();
        assert_eq!(index.fingerprint_version(1).unwrap(), None);
    }

    #[test]
    fn stats_reports_doc_id_range_and_count() {
        let dir = tempfile::TempDir::new().unwrap();
        Index::create(dir.path()).unwrap();
        let index = Index::open(dir.path(), 8 * 1024 * 1024, MergePolicyConfig::default(), 2, Arc::new(Metrics::new())).unwrap();
        index.apply(insert(5, &[1])).unwrap();
        index.apply(insert(2, &[2])).unwrap();

        let stats = index.stats();
        assert_eq!(stats.num_docs, 2);
        assert_eq!(stats.min_doc_id, 2);
        assert_eq!(stats.max_doc_id, 5);
        assert_eq!(stats.num_segments, 0);
    }

    #[test]
    fn write_snapshot_produces_tar_with_manifest() {
        let dir = tempfile::TempDir::new().unwrap();
        Index::create(dir.path()).unwrap();
        let index = Index::open(dir.path(), 8 * 1024 * 1024, MergePolicyConfig::default(), 2, Arc::new(Metrics::new())).unwrap();
        index.apply(insert(1, &[10])).unwrap();

        let mut out = Vec::new();
        index.write_snapshot(&mut out).unwrap();
        let mut archive = tar::Archive::new(std::io::Cursor::new(&out));
        let entries: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(entries.contains(&"manifest".to_string()));
    }

    #[test]
    fn delete_removes_directory_and_marks_deleted() {
        let root = tempfile::TempDir::new().unwrap();
        let index_dir = root.path().join("myindex");
        Index::create(&index_dir).unwrap();
        let index = Index::open(&index_dir, 8 * 1024 * 1024, MergePolicyConfig::default(), 2, Arc::new(Metrics::new())).unwrap();
        index.delete(root.path(), "myindex").unwrap();
        assert_eq!(index.state(), IndexState::Deleted);
        assert!(!index_dir.exists());
    }
}
