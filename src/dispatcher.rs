use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Style;
use crate::error::Result;
use crate::ops::{Op, OpsReader};
use crate::worker::QueueItem;

/// Longest single sleep while pacing, so an interrupted run notices the
/// closed queue promptly.
const PACING_SLICE: Duration = Duration::from_millis(100);

// ─── Public entry point ──────────────────────────────────────────

/// Runs [`dispatch`] on a blocking thread. Resolves to the number of ops
/// put on the queue.
pub fn spawn(
    reader: Box<dyn OpsReader>,
    style: Style,
    op_limit: Option<u64>,
    workers: usize,
    queue: async_channel::Sender<QueueItem>,
) -> JoinHandle<Result<u64>> {
    tokio::task::spawn_blocking(move || {
        let mut reader = reader;
        dispatch(&mut reader, style, op_limit, workers, &queue)
    })
}

/// Feed ops from `reader` into `queue` under the pacing `style`, then
/// push one stop sentinel per worker.
///
/// Sentinels are sent even when reading fails part-way, so workers
/// always terminate. The read error is returned afterwards.
pub fn dispatch<R>(
    reader: &mut R,
    style: Style,
    op_limit: Option<u64>,
    workers: usize,
    queue: &async_channel::Sender<QueueItem>,
) -> Result<u64>
where
    R: OpsReader + ?Sized,
{
    let mut sent = 0u64;
    let result = match style {
        Style::Stress => best_effort(reader, op_limit, queue, &mut sent),
        Style::Real => by_time(reader, op_limit, queue, &mut sent),
    };

    for _ in 0..workers {
        if queue.send_blocking(None).is_err() {
            break;
        }
    }
    info!("Dispatched {sent} ops to {workers} workers");

    result.map(|()| sent)
}

// ─── Pacing policies ─────────────────────────────────────────────

/// Push as fast as the workers drain the queue.
fn best_effort<R>(
    reader: &mut R,
    op_limit: Option<u64>,
    queue: &async_channel::Sender<QueueItem>,
    sent: &mut u64,
) -> Result<()>
where
    R: OpsReader + ?Sized,
{
    while op_limit.map_or(true, |max| *sent < max) {
        let Some(op) = reader.next_op()? else {
            break;
        };
        if !push(queue, op) {
            break;
        }
        *sent += 1;
    }
    Ok(())
}

/// Keep each op's offset from the first op equal to its offset in the
/// recording. Never sleeps when already behind schedule.
fn by_time<R>(
    reader: &mut R,
    op_limit: Option<u64>,
    queue: &async_channel::Sender<QueueItem>,
    sent: &mut u64,
) -> Result<()>
where
    R: OpsReader + ?Sized,
{
    let mut origin: Option<(u64, Instant)> = None;

    while op_limit.map_or(true, |max| *sent < max) {
        let Some(op) = reader.next_op()? else {
            break;
        };

        let (first_ts, started) = *origin.get_or_insert_with(|| (op.timestamp, Instant::now()));
        let offset = Duration::from_millis(op.timestamp.saturating_sub(first_ts));
        if !pace_until(started + offset, queue) {
            break;
        }
        if !push(queue, op) {
            break;
        }
        *sent += 1;
    }
    Ok(())
}

/// `false` once the queue is closed (run interrupted).
fn push(queue: &async_channel::Sender<QueueItem>, op: Op) -> bool {
    if queue.send_blocking(Some(op)).is_err() {
        debug!("Op queue closed, stopping dispatch");
        return false;
    }
    true
}

/// Sleep until `target`, waking periodically to check for a closed queue.
fn pace_until(target: Instant, queue: &async_channel::Sender<QueueItem>) -> bool {
    loop {
        if queue.is_closed() {
            debug!("Op queue closed while pacing");
            return false;
        }
        let now = Instant::now();
        if now >= target {
            return true;
        }
        std::thread::sleep((target - now).min(PACING_SLICE));
    }
}
