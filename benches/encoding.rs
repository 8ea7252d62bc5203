//! Stream-vbyte-style posting encode/decode throughput.
//!
//! Run: cargo bench --bench encoding

use aindex::storage::encoding::{decode_postings, encode_postings};
use aindex::storage::types::Posting;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn make_postings(num_hashes: usize, docs_per_hash: usize) -> Vec<Posting> {
    let mut postings = Vec::with_capacity(num_hashes * docs_per_hash);
    for hash in 0..num_hashes as u32 {
        for doc in 0..docs_per_hash as u32 {
            postings.push((hash * 7, doc * 3));
        }
    }
    postings
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_postings");
    for size in [100, 1_000, 10_000] {
        let postings = make_postings(size, 4);
        group.bench_with_input(BenchmarkId::from_parameter(size), &postings, |b, postings| {
            b.iter(|| black_box(encode_postings(postings)));
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_postings");
    for size in [100, 1_000, 10_000] {
        let postings = make_postings(size, 4);
        let encoded = encode_postings(&postings);
        let count = postings.len();
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| black_box(decode_postings(encoded, count).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
