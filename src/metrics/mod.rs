pub mod analyzer;
pub mod collector;
pub mod percentiles;
pub mod report;

use std::time::Duration;

use crate::ops::OpType;

pub use analyzer::{StatsAnalyzer, Status};
pub use collector::{CollectorSnapshot, LatencySampler, OpCounters, StatsCollector};
pub use percentiles::{Percentile, PercentileSet};

/// A single timing observation recorded by a worker.
/// Created once after an op finishes and sent to the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Latency {
    pub op_type: OpType,
    /// Wall time of the whole op, retry included.
    pub duration: Duration,
}
