use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use super::collector::{CollectorSnapshot, OpCounters};
use super::percentiles::PercentileSet;
use super::Latency;
use crate::ops::OpType;

// ─── Public types ────────────────────────────────────────────────

/// Aggregated view across all workers, computed by
/// [`StatsAnalyzer::get_status`].
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub ops_executed: u64,
    pub elapsed_secs: f64,
    pub ops_per_sec: f64,
    /// Throughput since the previous status.
    pub recent_ops_per_sec: f64,

    pub counts: BTreeMap<OpType, u64>,
    pub type_ops_per_sec: BTreeMap<OpType, f64>,

    /// Percentiles over every retained sample.
    pub all_time: BTreeMap<OpType, PercentileSet>,
    /// Percentiles over samples that arrived since the previous status.
    pub since_last: BTreeMap<OpType, PercentileSet>,

    pub permanent_failures: u64,
    pub transient_failures: u64,
    pub retries: u64,
    pub dropped_samples: u64,
    pub retained_samples: usize,
}

impl Status {
    pub fn count(&self, op_type: OpType) -> u64 {
        self.counts.get(&op_type).copied().unwrap_or(0)
    }

    /// Sum of per-type counts across all workers.
    pub fn total_counted(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// Turns per-worker counters and the shared sample stream into
/// [`Status`] reports. Safe to share with the reporter task.
pub struct StatsAnalyzer {
    collectors: Vec<Arc<OpCounters>>,
    ops_executed: Arc<AtomicU64>,
    inner: Mutex<Inner>,
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    samples: mpsc::Receiver<Latency>,

    // Rolling window of retained samples, oldest evicted first
    retained: VecDeque<Latency>,
    capacity: usize,

    // Baselines for the since-last view
    started: Instant,
    last_report: Instant,
    last_ops: u64,
}

// ─── StatsAnalyzer impl ──────────────────────────────────────────

impl StatsAnalyzer {
    /// `capacity` bounds the retained sample ring; `0` keeps none.
    pub fn new(
        collectors: Vec<Arc<OpCounters>>,
        ops_executed: Arc<AtomicU64>,
        samples: mpsc::Receiver<Latency>,
        capacity: usize,
    ) -> Self {
        let now = Instant::now();
        Self {
            collectors,
            ops_executed,
            inner: Mutex::new(Inner {
                samples,
                retained: VecDeque::with_capacity(capacity.min(4096)),
                capacity,
                started: now,
                last_report: now,
                last_ops: 0,
            }),
        }
    }

    /// Current value of the shared executed-ops counter.
    pub fn ops_executed(&self) -> u64 {
        self.ops_executed.load(Ordering::Acquire)
    }

    /// Produce a report and reset the since-last baseline.
    pub fn get_status(&self) -> Status {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        // Read the shared counter before the collectors: workers bump
        // their collector first, so per-type sums are never behind it.
        let ops_executed = self.ops_executed();
        let snapshots: Vec<CollectorSnapshot> =
            self.collectors.iter().map(|c| c.snapshot()).collect();

        let fresh = inner.drain_samples();

        let elapsed = now.duration_since(inner.started);
        let window = now.duration_since(inner.last_report);
        let elapsed_secs = elapsed.as_secs_f64();

        let mut counts = BTreeMap::new();
        let mut type_ops_per_sec = BTreeMap::new();
        for op_type in OpType::ALL {
            let n: u64 = snapshots.iter().map(|s| s.count(op_type)).sum();
            counts.insert(op_type, n);
            type_ops_per_sec.insert(op_type, rate(n, elapsed));
        }

        let status = Status {
            ops_executed,
            elapsed_secs,
            ops_per_sec: rate(ops_executed, elapsed),
            recent_ops_per_sec: rate(ops_executed.saturating_sub(inner.last_ops), window),
            counts,
            type_ops_per_sec,
            all_time: percentiles_by_type(inner.retained.iter()),
            since_last: percentiles_by_type(fresh.iter()),
            permanent_failures: snapshots.iter().map(|s| s.permanent_failures).sum(),
            transient_failures: snapshots.iter().map(|s| s.transient_failures).sum(),
            retries: snapshots.iter().map(|s| s.retries).sum(),
            dropped_samples: snapshots.iter().map(|s| s.dropped_samples).sum(),
            retained_samples: inner.retained.len(),
        };

        inner.last_report = now;
        inner.last_ops = ops_executed;
        status
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    /// Pull everything queued on the channel into the ring and return
    /// the newly arrived batch.
    fn drain_samples(&mut self) -> Vec<Latency> {
        let mut fresh = Vec::new();
        while let Ok(sample) = self.samples.try_recv() {
            fresh.push(sample);
        }

        if self.capacity > 0 {
            for sample in &fresh {
                if self.retained.len() == self.capacity {
                    self.retained.pop_front();
                }
                self.retained.push_back(*sample);
            }
        }
        fresh
    }
}

fn rate(count: u64, over: Duration) -> f64 {
    let secs = over.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

fn percentiles_by_type<'a, I>(samples: I) -> BTreeMap<OpType, PercentileSet>
where
    I: Iterator<Item = &'a Latency> + Clone,
{
    OpType::ALL
        .into_iter()
        .map(|op_type| {
            let durations = samples
                .clone()
                .filter(|l| l.op_type == op_type)
                .map(|l| l.duration);
            (op_type, PercentileSet::from_durations(durations))
        })
        .collect()
}
