use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;

use super::analyzer::{StatsAnalyzer, Status};
use super::percentiles::{Percentile, PercentileSet};
use crate::ops::OpType;

// ─── Periodic reporter ───────────────────────────────────────────

/// Handle to the running reporter task.
pub struct Reporter {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Status>,
}

impl Reporter {
    /// Reports every `every` until `op_limit` ops have executed or
    /// [`Reporter::finish`] is called, then emits one final report.
    pub fn spawn(analyzer: Arc<StatsAnalyzer>, every: Duration, op_limit: Option<u64>) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(report_loop(analyzer, every, op_limit, stop_rx));
        Self {
            stop: Some(stop_tx),
            handle,
        }
    }

    /// Stop the loop and wait for the final report.
    pub async fn finish(mut self) -> Result<Status, tokio::task::JoinError> {
        if let Some(stop) = self.stop.take() {
            // Err means the loop already hit the op limit on its own.
            let _ = stop.send(());
        }
        self.handle.await
    }
}

async fn report_loop(
    analyzer: Arc<StatsAnalyzer>,
    every: Duration,
    op_limit: Option<u64>,
    mut stop: oneshot::Receiver<()>,
) -> Status {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if op_limit.is_some_and(|max| analyzer.ops_executed() >= max) {
                    break;
                }
                log_status(&analyzer.get_status());
            }
            _ = &mut stop => break,
        }
    }

    let status = analyzer.get_status();
    log_status(&status);
    status
}

// ─── Formatting ──────────────────────────────────────────────────

/// Emit one human-readable report through `tracing`.
pub fn log_status(status: &Status) {
    for line in render(status) {
        info!("{line}");
    }
}

/// Report lines, one op type block per known type.
pub fn render(status: &Status) -> Vec<String> {
    let mut lines = Vec::with_capacity(2 + OpType::ALL.len() * 3);
    lines.push(format!(
        "Executed {} ops, {:.2} ops/sec ({:.2} ops/sec recent)",
        status.ops_executed, status.ops_per_sec, status.recent_ops_per_sec
    ));
    if status.permanent_failures + status.transient_failures > 0 || status.retries > 0 {
        lines.push(format!(
            "  Errors: {} permanent, {} transient, {} retries",
            status.permanent_failures, status.transient_failures, status.retries
        ));
    }

    let empty = PercentileSet::empty();
    for op_type in OpType::ALL {
        lines.push(format!(
            "  Op type: {}, count: {}, ops/sec: {:.2}",
            op_type,
            status.count(op_type),
            status.type_ops_per_sec.get(&op_type).copied().unwrap_or(0.0),
        ));
        let all_time = status.all_time.get(&op_type).unwrap_or(&empty);
        let since_last = status.since_last.get(&op_type).unwrap_or(&empty);
        lines.push(percentile_line("Total", all_time));
        lines.push(percentile_line("Last ", since_last));
    }
    lines
}

fn percentile_line(label: &str, set: &PercentileSet) -> String {
    let cells: Vec<String> = Percentile::ALL
        .iter()
        .map(|&p| format!("{p}: {:.2}ms", set.millis(p)))
        .collect();
    format!("   {label}: {}", cells.join(", "))
}
