//! Single-segment scan throughput as segment size grows.
//!
//! Run: cargo bench --bench segment_scan

use aindex::storage::segment::{Segment, SegmentWriter};
use aindex::storage::types::Posting;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn build_segment(num_hashes: usize, docs_per_hash: usize) -> Segment {
    let mut postings: Vec<Posting> = Vec::with_capacity(num_hashes * docs_per_hash);
    for hash in 0..num_hashes as u32 {
        for doc in 0..docs_per_hash as u32 {
            postings.push((hash, doc));
        }
    }
    let bytes = SegmentWriter::new(1, 1).with_postings(postings).build();
    Segment::from_owned_bytes(bytes).unwrap()
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_scan");
    for num_hashes in [1_000, 10_000, 100_000] {
        let segment = build_segment(num_hashes, 4);
        let query = (num_hashes / 2) as u32;
        group.bench_with_input(BenchmarkId::from_parameter(num_hashes), &segment, |b, segment| {
            b.iter(|| black_box(segment.scan(query).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scan);
criterion_main!(benches);
