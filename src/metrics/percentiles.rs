use std::fmt;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

// ─── Configuration ───────────────────────────────────────────────

/// HdrHistogram range: 1 μs → 1 h, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 3_600_000_000;
const HIST_SIGFIG: u8 = 3;

// ─── Percentile buckets ──────────────────────────────────────────

/// The cutoffs every report shows, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Percentile {
    P50,
    P70,
    P90,
    P95,
    P99,
    Max,
}

impl Percentile {
    pub const ALL: [Percentile; 6] = [
        Percentile::P50,
        Percentile::P70,
        Percentile::P90,
        Percentile::P95,
        Percentile::P99,
        Percentile::Max,
    ];

    pub fn quantile(self) -> f64 {
        match self {
            Percentile::P50 => 0.50,
            Percentile::P70 => 0.70,
            Percentile::P90 => 0.90,
            Percentile::P95 => 0.95,
            Percentile::P99 => 0.99,
            Percentile::Max => 1.0,
        }
    }
}

impl fmt::Display for Percentile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Percentile::P50 => "P50",
            Percentile::P70 => "P70",
            Percentile::P90 => "P90",
            Percentile::P95 => "P95",
            Percentile::P99 => "P99",
            Percentile::Max => "Max",
        };
        f.write_str(s)
    }
}

// ─── Percentile set ──────────────────────────────────────────────

/// Latency cutoffs (μs) for one op type over one window of samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentileSet {
    pub p50: u64,
    pub p70: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
    pub max: u64,
    pub count: u64,
}

impl PercentileSet {
    /// Bucket raw durations into a histogram and read the cutoffs off it.
    pub fn from_durations<I>(durations: I) -> Self
    where
        I: IntoIterator<Item = Duration>,
    {
        let mut hist = new_histogram();
        for d in durations {
            hist.saturating_record((d.as_micros() as u64).max(HIST_LOW));
        }
        Self::from_histogram(&hist)
    }

    /// Returns zeroed values if the histogram is empty.
    pub fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.is_empty() {
            return Self::empty();
        }

        Self {
            p50: hist.value_at_quantile(Percentile::P50.quantile()),
            p70: hist.value_at_quantile(Percentile::P70.quantile()),
            p90: hist.value_at_quantile(Percentile::P90.quantile()),
            p95: hist.value_at_quantile(Percentile::P95.quantile()),
            p99: hist.value_at_quantile(Percentile::P99.quantile()),
            max: hist.max(),
            count: hist.len(),
        }
    }

    /// All-zero placeholder used before any samples are recorded.
    pub fn empty() -> Self {
        Self {
            p50: 0,
            p70: 0,
            p90: 0,
            p95: 0,
            p99: 0,
            max: 0,
            count: 0,
        }
    }

    pub fn get(&self, p: Percentile) -> u64 {
        match p {
            Percentile::P50 => self.p50,
            Percentile::P70 => self.p70,
            Percentile::P90 => self.p90,
            Percentile::P95 => self.p95,
            Percentile::P99 => self.p99,
            Percentile::Max => self.max,
        }
    }

    /// Cutoff in milliseconds, for the human-readable report.
    pub fn millis(&self, p: Percentile) -> f64 {
        self.get(p) as f64 / 1000.0
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

fn new_histogram() -> Histogram<u64> {
    // Bounds are constants known to be valid.
    Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
        .expect("histogram creation")
}
