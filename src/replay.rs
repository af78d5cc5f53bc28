use std::future::Future;
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{ReplayConfig, Style};
use crate::dispatcher;
use crate::error::Result;
use crate::metrics::report::Reporter;
use crate::metrics::{LatencySampler, StatsAnalyzer, StatsCollector, Status};
use crate::ops::{CyclicOpsReader, FileOpsReader, OpsReader};
use crate::session::{OpsExecutor, SessionFactory};
use crate::worker::WorkerPool;

/// Queue slots per worker between dispatcher and pool.
const QUEUE_DEPTH_PER_WORKER: usize = 8;

/// Base seed for the per-worker samplers (worker id is added).
const SAMPLER_SEED: u64 = 1000;

// ─── Run summary ─────────────────────────────────────────────────

/// Everything known about a finished run. Serialized for `--summary-json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub config: ReplayConfig,
    pub dispatched: u64,
    pub workers_completed: usize,
    pub status: Status,
}

impl RunSummary {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

// ─── Op source ───────────────────────────────────────────────────

/// Open the configured ops file, wrapped cyclically for `real` style,
/// then seek: start time first, skip count second.
pub fn open_source(config: &ReplayConfig) -> Result<Box<dyn OpsReader>> {
    let mut reader: Box<dyn OpsReader> = match config.style {
        Style::Stress => Box::new(FileOpsReader::open(&config.ops_filename)?),
        Style::Real => {
            let path = config.ops_filename.clone();
            Box::new(CyclicOpsReader::new(move || {
                Ok(Box::new(FileOpsReader::open(&path)?) as Box<dyn OpsReader>)
            })?)
        }
    };

    if let Some(start) = config.start_time {
        let skipped = reader.set_start_time(start)?;
        info!("Skipped {skipped} ops recorded before {start}");
    }
    if config.skip_ops > 0 {
        reader.skip_ops(config.skip_ops)?;
        info!("Skipped the next {} ops", config.skip_ops);
    }
    Ok(reader)
}

// ─── Coordinator ─────────────────────────────────────────────────

/// Replay `reader` against sessions from `factory` until the source is
/// exhausted, `max_ops` ops have run, or `interrupt` resolves.
///
/// Only startup problems (bad config, sessions that cannot connect) and
/// op-source read errors surface as `Err`; individual op failures are
/// counted in the returned status.
pub async fn run<F, E, I>(
    config: Arc<ReplayConfig>,
    reader: Box<dyn OpsReader>,
    factory: F,
    executor: E,
    interrupt: I,
) -> Result<RunSummary>
where
    F: SessionFactory,
    E: OpsExecutor<F::Session>,
    I: Future<Output = ()> + Send + 'static,
{
    config.validate()?;

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!(
        "Replay {run_id}: style={}, workers={}, max_ops={}, sample_rate={}",
        config.style,
        config.workers,
        config.op_limit().map_or("unbounded".to_string(), |n| n.to_string()),
        config.sample_rate,
    );

    // ── 1. Stats pipeline ────────────────────────────────────────
    let capacity = config.sample_capacity();
    let (latency_tx, latency_rx) = mpsc::channel(capacity.max(1));
    let collectors: Vec<StatsCollector> = (0..config.workers)
        .map(|id| {
            let sampler = if capacity > 0 {
                LatencySampler::new(config.sample_rate, latency_tx.clone(), SAMPLER_SEED + id as u64)
            } else {
                LatencySampler::disabled()
            };
            StatsCollector::new(sampler)
        })
        .collect();
    drop(latency_tx);

    let ops_executed = Arc::new(AtomicU64::new(0));
    let analyzer = Arc::new(StatsAnalyzer::new(
        collectors.iter().map(|c| c.counters()).collect(),
        ops_executed.clone(),
        latency_rx,
        capacity,
    ));

    // ── 2. Workers ───────────────────────────────────────────────
    let (queue_tx, queue_rx) = async_channel::bounded(config.workers * QUEUE_DEPTH_PER_WORKER);
    let pool = WorkerPool::start(
        &factory,
        Arc::new(executor),
        queue_rx,
        ops_executed,
        collectors,
        config.verbose,
    )
    .await?;

    // ── 3. Reporter + interrupt watcher ──────────────────────────
    let reporter = Reporter::spawn(analyzer, config.report_interval(), config.op_limit());

    let closer = queue_tx.clone();
    let watcher = tokio::spawn(async move {
        interrupt.await;
        warn!("Interrupted, closing op queue");
        closer.close();
    });

    // ── 4. Dispatch and wait ─────────────────────────────────────
    let dispatcher = dispatcher::spawn(reader, config.style, config.op_limit(), config.workers, queue_tx);

    let workers_completed = pool.wait().await;
    watcher.abort();
    let dispatched = dispatcher.await?;
    let status = reporter.finish().await?;

    let dispatched = match dispatched {
        Ok(n) => n,
        Err(e) => {
            error!("Reading ops failed: {e}");
            return Err(e);
        }
    };

    Ok(RunSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        config: (*config).clone(),
        dispatched,
        workers_completed,
        status,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn ops_file(n: u64) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for i in 0..n {
            writeln!(f, r#"{{"ts": {}, "op": "query", "cmd": ["GET", "k{i}"]}}"#, 1000 + i * 10)
                .unwrap();
        }
        f
    }

    fn drain(reader: &mut dyn OpsReader, max: usize) -> Vec<u64> {
        let mut out = Vec::new();
        while out.len() < max {
            match reader.next_op().unwrap() {
                Some(op) => out.push(op.timestamp),
                None => break,
            }
        }
        out
    }

    #[test]
    fn stress_source_seeks_then_skips() {
        let f = ops_file(10);
        let mut cfg = ReplayConfig::new(f.path(), "redis://localhost/", Style::Stress);
        cfg.start_time = Some(1030);
        cfg.skip_ops = 2;
        let mut reader = open_source(&cfg).unwrap();
        assert_eq!(drain(reader.as_mut(), 100), vec![1050, 1060, 1070, 1080, 1090]);
    }

    #[test]
    fn real_source_cycles() {
        let f = ops_file(3);
        let cfg = ReplayConfig::new(f.path(), "redis://localhost/", Style::Real);
        let mut reader = open_source(&cfg).unwrap();
        assert_eq!(drain(reader.as_mut(), 5), vec![1000, 1010, 1020, 1030, 1040]);
    }

    #[test]
    fn missing_ops_file_fails_at_open() {
        let cfg = ReplayConfig::new("/no/such/ops.jsonl", "redis://localhost/", Style::Real);
        assert!(open_source(&cfg).is_err());
    }
}
