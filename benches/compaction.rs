//! Tiered segment merge throughput as the fan-in segment count grows.
//!
//! Run: cargo bench --bench compaction

use aindex::storage::segment::{Segment, SegmentWriter};
use aindex::storage::segment_set::{SegmentEntry, SegmentSet};
use aindex::storage::types::{Posting, SegmentDescriptor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn entry_for(segment_id: u64, postings: Vec<Posting>) -> SegmentEntry {
    let bytes = SegmentWriter::new(segment_id, segment_id).with_postings(postings).build();
    let segment = Segment::from_owned_bytes(bytes).unwrap();
    let (first_version, last_version) = segment.version_range();
    let (min_doc_id, max_doc_id) = segment.doc_id_range();
    let descriptor = SegmentDescriptor {
        segment_id,
        first_version,
        last_version,
        min_doc_id,
        max_doc_id,
        num_docs: segment.num_docs(),
        num_postings: segment.num_postings(),
        file_size: 0,
        checksum: 0,
    };
    SegmentEntry { descriptor, segment }
}

fn build_set(fan_in: usize, postings_per_segment: usize) -> SegmentSet {
    let mut entries = Vec::with_capacity(fan_in);
    for i in 0..fan_in as u64 {
        let postings: Vec<Posting> = (0..postings_per_segment as u32)
            .map(|j| (j, (i as u32) * postings_per_segment as u32 + j))
            .collect();
        entries.push(entry_for(i, postings));
    }
    SegmentSet::new(entries)
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_segments");
    for fan_in in [4, 8, 16] {
        let set = build_set(fan_in, 1_000);
        let indices: Vec<usize> = (0..fan_in).collect();
        group.bench_with_input(BenchmarkId::from_parameter(fan_in), &set, |b, set| {
            b.iter(|| black_box(set.merge(&indices).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_merge);
criterion_main!(benches);
