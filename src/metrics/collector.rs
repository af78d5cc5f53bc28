use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::Latency;
use crate::ops::{OpType, OP_TYPE_COUNT};
use crate::session::Outcome;

// ─── Shared counters ─────────────────────────────────────────────

/// Counters for one worker. Only the owning worker writes; the analyzer
/// reads them from another task through [`OpCounters::snapshot`].
#[derive(Debug, Default)]
pub struct OpCounters {
    total: AtomicU64,
    per_type: [AtomicU64; OP_TYPE_COUNT],
    permanent_failures: AtomicU64,
    transient_failures: AtomicU64,
    retries: AtomicU64,
    dropped_samples: AtomicU64,
}

/// Point-in-time copy of one worker's [`OpCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorSnapshot {
    pub total: u64,
    pub counts: [u64; OP_TYPE_COUNT],
    pub permanent_failures: u64,
    pub transient_failures: u64,
    pub retries: u64,
    pub dropped_samples: u64,
}

impl OpCounters {
    pub fn snapshot(&self) -> CollectorSnapshot {
        let mut counts = [0u64; OP_TYPE_COUNT];
        for (slot, counter) in counts.iter_mut().zip(&self.per_type) {
            *slot = counter.load(Ordering::Acquire);
        }
        CollectorSnapshot {
            total: self.total.load(Ordering::Acquire),
            counts,
            permanent_failures: self.permanent_failures.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            dropped_samples: self.dropped_samples.load(Ordering::Relaxed),
        }
    }
}

impl CollectorSnapshot {
    pub fn count(&self, op_type: OpType) -> u64 {
        self.counts[op_type.index()]
    }
}

// ─── Latency sampler ─────────────────────────────────────────────

/// Keeps each observation with probability `rate` and forwards it to
/// the analyzer. Never blocks: a full channel drops the sample.
pub struct LatencySampler {
    rate: f64,
    tx: Option<mpsc::Sender<Latency>>,
    rng: StdRng,
}

impl LatencySampler {
    pub fn new(rate: f64, tx: mpsc::Sender<Latency>, seed: u64) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
            tx: Some(tx),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Sampler that keeps nothing (`sample_rate == 0`).
    pub fn disabled() -> Self {
        Self {
            rate: 0.0,
            tx: None,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// `false` when the sample was selected but could not be delivered.
    fn offer(&mut self, latency: Latency) -> bool {
        let Some(tx) = &self.tx else {
            return true;
        };
        if self.rate <= 0.0 || !self.rng.gen_bool(self.rate) {
            return true;
        }
        match tx.try_send(latency) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            // Analyzer is gone; nothing left to report to.
            Err(TrySendError::Closed(_)) => {
                self.tx = None;
                true
            }
        }
    }
}

// ─── Per-worker collector ────────────────────────────────────────

/// Owned by one worker. The hot path only touches atomics.
pub struct StatsCollector {
    counters: Arc<OpCounters>,
    sampler: LatencySampler,
}

impl StatsCollector {
    pub fn new(sampler: LatencySampler) -> Self {
        Self {
            counters: Arc::new(OpCounters::default()),
            sampler,
        }
    }

    /// Read side handed to the analyzer.
    pub fn counters(&self) -> Arc<OpCounters> {
        self.counters.clone()
    }

    /// Account for one executed op, successful or not.
    pub fn record(&mut self, op_type: OpType, elapsed: Duration, outcome: &Outcome, retried: bool) {
        let c = &self.counters;
        c.per_type[op_type.index()].fetch_add(1, Ordering::Release);
        c.total.fetch_add(1, Ordering::Release);
        if retried {
            c.retries.fetch_add(1, Ordering::Relaxed);
        }
        match outcome {
            Outcome::Success => {}
            Outcome::Permanent(_) => {
                c.permanent_failures.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Transient(_) => {
                c.transient_failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        let delivered = self.sampler.offer(Latency {
            op_type,
            duration: elapsed,
        });
        if !delivered {
            c.dropped_samples.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CollectorSnapshot {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_every_outcome_once() {
        let mut stats = StatsCollector::new(LatencySampler::disabled());
        let d = Duration::from_micros(10);
        stats.record(OpType::Query, d, &Outcome::Success, false);
        stats.record(OpType::Query, d, &Outcome::Permanent("nf".into()), false);
        stats.record(OpType::Insert, d, &Outcome::Transient("io".into()), true);

        let snap = stats.snapshot();
        assert_eq!(snap.total, 3);
        assert_eq!(snap.count(OpType::Query), 2);
        assert_eq!(snap.count(OpType::Insert), 1);
        assert_eq!(snap.counts.iter().sum::<u64>(), snap.total);
        assert_eq!(snap.permanent_failures, 1);
        assert_eq!(snap.transient_failures, 1);
        assert_eq!(snap.retries, 1);
    }

    #[test]
    fn sampling_rate_converges() {
        let (tx, mut rx) = mpsc::channel(100_000);
        let mut stats = StatsCollector::new(LatencySampler::new(0.25, tx, 1000));
        for _ in 0..20_000 {
            stats.record(OpType::Update, Duration::from_micros(5), &Outcome::Success, false);
        }
        let mut kept = 0;
        while rx.try_recv().is_ok() {
            kept += 1;
        }
        // 20k draws at p=0.25: σ ≈ 61, allow a generous band
        assert!((4_500..=5_500).contains(&kept), "kept {kept}");
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (tx, _rx) = mpsc::channel(2);
        let mut stats = StatsCollector::new(LatencySampler::new(1.0, tx, 7));
        for _ in 0..5 {
            stats.record(OpType::Count, Duration::from_micros(1), &Outcome::Success, false);
        }
        let snap = stats.snapshot();
        assert_eq!(snap.total, 5);
        assert_eq!(snap.dropped_samples, 3);
    }

    #[test]
    fn closed_channel_is_ignored() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let mut stats = StatsCollector::new(LatencySampler::new(1.0, tx, 7));
        stats.record(OpType::Remove, Duration::from_micros(1), &Outcome::Success, false);
        assert_eq!(stats.snapshot().dropped_samples, 0);
    }

    #[test]
    fn snapshot_from_another_thread() {
        let mut stats = StatsCollector::new(LatencySampler::disabled());
        let reader = stats.counters();
        let handle = std::thread::spawn(move || {
            let mut last = 0;
            for _ in 0..1000 {
                let snap = reader.snapshot();
                assert!(snap.total >= last);
                last = snap.total;
            }
        });
        for _ in 0..10_000 {
            stats.record(OpType::Command, Duration::ZERO, &Outcome::Success, false);
        }
        handle.join().unwrap();
        assert_eq!(stats.snapshot().total, 10_000);
    }
}
