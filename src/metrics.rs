//! Process-wide performance metrics (§4.13, §6.4).
//!
//! Lightweight, thread-safe counters with zero cost when nobody is
//! scraping: everything is `AtomicU64`, no locks on the hot path. Matches
//! the teacher's `metrics.rs` design (atomics over a mutex-guarded struct)
//! but swaps its graph-engine-specific counters for the names this index
//! exposes at `GET /_metrics` in Prometheus text format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Fixed bucket upper bounds (seconds) for the two histograms this module
/// tracks. Matches Prometheus's own convention of `+Inf`-terminated,
/// cumulative buckets.
const STARTUP_DURATION_BUCKETS_SECONDS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0];
const PARALLEL_SEGMENT_COUNT_BUCKETS: &[f64] = &[1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0];

/// A fixed-bucket cumulative histogram, recorded with plain atomics.
struct Histogram {
    bounds: &'static [f64],
    bucket_counts: Vec<AtomicU64>,
    sum_bits: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn new(bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            bucket_counts: (0..bounds.len()).map(|_| AtomicU64::new(0)).collect(),
            sum_bits: AtomicU64::new(0.0f64.to_bits()),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, value: f64) {
        for (i, bound) in self.bounds.iter().enumerate() {
            if value <= *bound {
                self.bucket_counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        // Racy read-modify-write on the sum is acceptable for a metrics
        // endpoint scraped on a multi-second interval; exact precision
        // under concurrent writers is not required.
        let mut current = f64::from_bits(self.sum_bits.load(Ordering::Relaxed));
        current += value;
        self.sum_bits.store(current.to_bits(), Ordering::Relaxed);
    }

    fn write_prometheus(&self, out: &mut String, name: &str, help: &str) {
        out.push_str(&format!("# HELP {name} {help}\n"));
        out.push_str(&format!("# TYPE {name} histogram\n"));
        let mut cumulative = 0u64;
        for (bound, bucket) in self.bounds.iter().zip(&self.bucket_counts) {
            cumulative = cumulative.max(bucket.load(Ordering::Relaxed));
            out.push_str(&format!("{name}_bucket{{le=\"{bound}\"}} {cumulative}\n"));
        }
        let total = self.count.load(Ordering::Relaxed);
        out.push_str(&format!("{name}_bucket{{le=\"+Inf\"}} {total}\n"));
        out.push_str(&format!("{name}_sum {}\n", f64::from_bits(self.sum_bits.load(Ordering::Relaxed))));
        out.push_str(&format!("{name}_count {total}\n"));
    }
}

/// Process-wide metrics collector. One instance lives for the life of the
/// server and is shared behind an `Arc` with every HTTP handler and
/// background task.
pub struct Metrics {
    searches_total: AtomicU64,
    updates_total: AtomicU64,
    checkpoints_total: AtomicU64,
    merges_total: AtomicU64,
    parallel_loading_total: AtomicU64,
    sequential_loading_total: AtomicU64,
    startup_duration_seconds: Histogram,
    parallel_segment_count: Histogram,
    started_at: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            searches_total: AtomicU64::new(0),
            updates_total: AtomicU64::new(0),
            checkpoints_total: AtomicU64::new(0),
            merges_total: AtomicU64::new(0),
            parallel_loading_total: AtomicU64::new(0),
            sequential_loading_total: AtomicU64::new(0),
            startup_duration_seconds: Histogram::new(STARTUP_DURATION_BUCKETS_SECONDS),
            parallel_segment_count: Histogram::new(PARALLEL_SEGMENT_COUNT_BUCKETS),
            started_at: Instant::now(),
        }
    }

    pub fn record_search(&self) {
        self.searches_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update(&self) {
        self.updates_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkpoint(&self) {
        self.checkpoints_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_merge(&self) {
        self.merges_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how an index's segments were validated at open: in parallel
    /// (segment count at or above `parallel_load_threshold`) or serially.
    pub fn record_segment_load(&self, parallel: bool, segment_count: usize) {
        if parallel {
            self.parallel_loading_total.fetch_add(1, Ordering::Relaxed);
            self.parallel_segment_count.observe(segment_count as f64);
        } else {
            self.sequential_loading_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_startup_duration(&self, seconds: f64) {
        self.startup_duration_seconds.observe(seconds);
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Render every metric in Prometheus text exposition format, the body
    /// returned by `GET /_metrics`.
    pub fn render(&self) -> String {
        let mut out = String::new();

        write_counter(&mut out, "aindex_searches_total", "Total search requests served", self.searches_total.load(Ordering::Relaxed));
        write_counter(&mut out, "aindex_updates_total", "Total update batches applied", self.updates_total.load(Ordering::Relaxed));
        write_counter(&mut out, "aindex_checkpoints_total", "Total stage checkpoints written", self.checkpoints_total.load(Ordering::Relaxed));
        write_counter(&mut out, "aindex_merges_total", "Total segment merges completed", self.merges_total.load(Ordering::Relaxed));
        write_counter(&mut out, "parallel_loading_total", "Index opens that validated segments in parallel", self.parallel_loading_total.load(Ordering::Relaxed));
        write_counter(&mut out, "sequential_loading_total", "Index opens that validated segments sequentially", self.sequential_loading_total.load(Ordering::Relaxed));

        self.startup_duration_seconds.write_prometheus(&mut out, "startup_duration_seconds", "Time to open an index at startup");
        self.parallel_segment_count.write_prometheus(&mut out, "parallel_segment_count", "Segment count when parallel loading was used");

        out
    }
}

fn write_counter(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} counter\n"));
    out.push_str(&format!("{name} {value}\n"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let metrics = Metrics::new();
        metrics.record_search();
        metrics.record_search();
        metrics.record_update();
        let rendered = metrics.render();
        assert!(rendered.contains("aindex_searches_total 2"));
        assert!(rendered.contains("aindex_updates_total 1"));
    }

    #[test]
    fn segment_load_routes_to_correct_counter() {
        let metrics = Metrics::new();
        metrics.record_segment_load(true, 8);
        metrics.record_segment_load(false, 1);
        let rendered = metrics.render();
        assert!(rendered.contains("parallel_loading_total 1"));
        assert!(rendered.contains("sequential_loading_total 1"));
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let histogram = Histogram::new(&[1.0, 5.0, 10.0]);
        histogram.observe(0.5);
        histogram.observe(3.0);
        histogram.observe(20.0);
        let mut out = String::new();
        histogram.write_prometheus(&mut out, "test_hist", "test");
        assert!(out.contains("test_hist_bucket{le=\"1\"} 1"));
        assert!(out.contains("test_hist_bucket{le=\"5\"} 2"));
        assert!(out.contains("test_hist_bucket{le=\"10\"} 2"));
        assert!(out.contains("test_hist_bucket{le=\"+Inf\"} 3"));
    }
}
