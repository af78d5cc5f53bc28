use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReplayError, Result};

// ─── Constants ───────────────────────────────────────────────────

/// One minute per socket operation unless told otherwise.
pub const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 60_000;

/// Upper bound on retained latency samples, whatever `max_ops` says.
pub const MAX_SAMPLE_CAPACITY: usize = 1 << 20;

// ─── Replay style ────────────────────────────────────────────────

/// How ops are paced onto the worker queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    /// As fast as the workers can drain the queue.
    Stress,
    /// Honour the recorded gaps between ops.
    Real,
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Style::Stress => f.write_str("stress"),
            Style::Real => f.write_str("real"),
        }
    }
}

// ─── Run configuration ───────────────────────────────────────────

/// Immutable settings for a single replay run. Built once at startup
/// and handed to the dispatcher, workers and analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub ops_filename: PathBuf,

    /// e.g. `redis://127.0.0.1:6379/`
    pub url: String,

    pub style: Style,

    #[serde(default = "default_workers")]
    pub workers: usize,

    /// `0` replays the whole source.
    #[serde(default)]
    pub max_ops: u64,

    #[serde(default)]
    pub skip_ops: usize,

    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,

    /// Probability (0.0–1.0) of keeping an op's latency for percentiles.
    #[serde(default)]
    pub sample_rate: f64,

    /// Unix milliseconds of the first op to replay.
    #[serde(default)]
    pub start_time: Option<u64>,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,

    #[serde(default)]
    pub summary_json: Option<PathBuf>,
}

fn default_workers() -> usize {
    10
}
fn default_socket_timeout_ms() -> u64 {
    DEFAULT_SOCKET_TIMEOUT_MS
}
fn default_report_interval_secs() -> u64 {
    5
}

impl ReplayConfig {
    /// Minimal config for `style` with every optional knob at its default.
    pub fn new(ops_filename: impl Into<PathBuf>, url: impl Into<String>, style: Style) -> Self {
        Self {
            ops_filename: ops_filename.into(),
            url: url.into(),
            style,
            workers: default_workers(),
            max_ops: 0,
            skip_ops: 0,
            socket_timeout_ms: default_socket_timeout_ms(),
            sample_rate: 0.0,
            start_time: None,
            verbose: false,
            report_interval_secs: default_report_interval_secs(),
            summary_json: None,
        }
    }

    /// Reject settings that would make the run meaningless. Nothing is
    /// started when this fails.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ReplayError::Config(
                "`workers` should be a positive number".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(ReplayError::Config(format!(
                "sample_rate must be between 0.0 and 1.0, got {}",
                self.sample_rate
            )));
        }
        if self.socket_timeout_ms == 0 {
            return Err(ReplayError::Config(
                "socket_timeout must be greater than zero".into(),
            ));
        }
        if self.report_interval_secs == 0 {
            return Err(ReplayError::Config(
                "report interval must be at least one second".into(),
            ));
        }
        Ok(())
    }

    /// `None` when the run is unbounded (`max_ops == 0`).
    pub fn op_limit(&self) -> Option<u64> {
        (self.max_ops > 0).then_some(self.max_ops)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    /// Size of the retained latency ring: `sample_rate × max_ops`,
    /// clamped to [`MAX_SAMPLE_CAPACITY`]. Unbounded runs get the cap.
    pub fn sample_capacity(&self) -> usize {
        if self.sample_rate <= 0.0 {
            return 0;
        }
        match self.op_limit() {
            Some(max) => {
                let wanted = (self.sample_rate * max as f64).round() as usize;
                wanted.clamp(1, MAX_SAMPLE_CAPACITY)
            }
            None => MAX_SAMPLE_CAPACITY,
        }
    }
}

/// Accepts unix milliseconds (`1396456709419`) or RFC 3339
/// (`2014-04-02T16:38:29.419Z`).
pub fn parse_start_time(s: &str) -> std::result::Result<u64, String> {
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(ms);
    }
    let ts = chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| format!("expected unix milliseconds or RFC 3339 timestamp: {e}"))?;
    u64::try_from(ts.timestamp_millis()).map_err(|_| "start time is before 1970".to_string())
}
