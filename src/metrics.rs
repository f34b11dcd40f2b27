//! In-process metrics in Prometheus exposition format
//!
//! The coordinator counts what it does with plain atomics; the embedding
//! application decides where (and whether) to ship the rendered text.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

fn exposition_header(name: &str, help: &str, kind: &str) -> String {
    format!("# HELP {name} {help}\n# TYPE {name} {kind}\n")
}

/// Monotonically increasing counter
pub struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn expose(&self) -> String {
        let mut out = exposition_header(self.name, self.help, "counter");
        out.push_str(&format!("{} {}\n", self.name, self.get()));
        out
    }
}

/// Gauge that moves both ways
pub struct Gauge {
    name: &'static str,
    help: &'static str,
    value: AtomicI64,
}

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicI64::new(0),
        }
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn expose(&self) -> String {
        let mut out = exposition_header(self.name, self.help, "gauge");
        out.push_str(&format!("{} {}\n", self.name, self.get()));
        out
    }
}

/// Latency histogram with bounds tuned for control-plane ticks
pub struct Histogram {
    name: &'static str,
    help: &'static str,
    bounds: &'static [f64],
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    /// Sum kept in microseconds so it fits an atomic
    sum_micros: AtomicU64,
}

/// Control-plane ticks range from sub-millisecond no-ops to multi-second
/// source round-trips
const DEFAULT_BOUNDS: &[f64] = &[0.005, 0.025, 0.1, 0.5, 1.0, 5.0, 30.0];

impl Histogram {
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self::with_bounds(name, help, DEFAULT_BOUNDS)
    }

    pub fn with_bounds(name: &'static str, help: &'static str, bounds: &'static [f64]) -> Self {
        Self {
            name,
            help,
            bounds,
            buckets: bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, seconds: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((seconds * 1_000_000.0) as u64, Ordering::Relaxed);
        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            if seconds <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Guard that records the elapsed time when dropped
    pub fn start_timer(&self) -> HistogramTimer<'_> {
        HistogramTimer {
            histogram: self,
            started: Instant::now(),
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn expose(&self) -> String {
        let mut out = exposition_header(self.name, self.help, "histogram");
        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            out.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                self.name,
                bound,
                bucket.load(Ordering::Relaxed)
            ));
        }
        out.push_str(&format!(
            "{}_sum {}\n",
            self.name,
            self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
        ));
        out.push_str(&format!("{}_count {}\n", self.name, self.count()));
        out
    }
}

/// Records into the histogram on drop
pub struct HistogramTimer<'a> {
    histogram: &'a Histogram,
    started: Instant,
}

impl Drop for HistogramTimer<'_> {
    fn drop(&mut self) {
        self.histogram.observe(self.started.elapsed().as_secs_f64());
    }
}

/// Standard coordinator metrics
pub mod standard {
    use super::*;
    use std::sync::LazyLock;

    pub static CONSUMERS_BUILT: Counter = Counter::new(
        "riptide_consumers_built_total",
        "Shard consumers constructed",
    );

    pub static COMPLETED_LEASES_CLEANED: Counter = Counter::new(
        "riptide_completed_leases_cleaned_total",
        "Leases of completed shards deleted",
    );

    pub static GARBAGE_LEASES_CLEANED: Counter = Counter::new(
        "riptide_garbage_leases_cleaned_total",
        "Leases of vanished shards deleted",
    );

    pub static SHARD_SYNCS_SUBMITTED: Counter = Counter::new(
        "riptide_shard_syncs_submitted_total",
        "Shard sync tasks submitted by the periodic manager",
    );

    pub static REJECTED_TASKS: Counter = Counter::new(
        "riptide_rejected_tasks_total",
        "Consumer tasks rejected by the saturated executor",
    );

    pub static ACTIVE_CONSUMERS: Gauge =
        Gauge::new("riptide_active_consumers", "Live shard consumers");

    pub static TRACKED_STREAMS: Gauge = Gauge::new(
        "riptide_tracked_streams",
        "Streams in the current config map",
    );

    pub static LEASES_PENDING_DELETION: Gauge = Gauge::new(
        "riptide_leases_pending_deletion",
        "Leases queued for deferred deletion",
    );

    pub static PROCESS_LOOP_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new(
            "riptide_process_loop_duration_seconds",
            "Scheduler process-loop tick latency",
        )
    });
}

/// Renders every standard metric
pub fn gather_system_metrics() -> String {
    let mut out = String::new();
    out.push_str(&standard::CONSUMERS_BUILT.expose());
    out.push_str(&standard::COMPLETED_LEASES_CLEANED.expose());
    out.push_str(&standard::GARBAGE_LEASES_CLEANED.expose());
    out.push_str(&standard::SHARD_SYNCS_SUBMITTED.expose());
    out.push_str(&standard::REJECTED_TASKS.expose());
    out.push_str(&standard::ACTIVE_CONSUMERS.expose());
    out.push_str(&standard::TRACKED_STREAMS.expose());
    out.push_str(&standard::LEASES_PENDING_DELETION.expose());
    out.push_str(&standard::PROCESS_LOOP_DURATION.expose());
    out
}
