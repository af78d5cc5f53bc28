use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::metrics::StatsCollector;
use crate::ops::Op;
use crate::session::{OpsExecutor, Outcome, Session, SessionFactory};

/// What travels on the shared op queue. `None` tells one worker to stop.
pub type QueueItem = Option<Op>;

// ─── Worker pool ─────────────────────────────────────────────────

/// N workers, each with its own session and stats collector, draining
/// one shared queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    done: mpsc::Receiver<usize>,
    size: usize,
}

impl WorkerPool {
    /// Opens every session first, so a connection failure aborts the
    /// run before any op is executed, then spawns one task per session.
    pub async fn start<F, E>(
        factory: &F,
        executor: Arc<E>,
        queue: async_channel::Receiver<QueueItem>,
        ops_executed: Arc<AtomicU64>,
        collectors: Vec<StatsCollector>,
        verbose: bool,
    ) -> Result<Self>
    where
        F: SessionFactory,
        E: OpsExecutor<F::Session>,
    {
        let size = collectors.len();
        let mut sessions = Vec::with_capacity(size);
        for id in 0..size {
            sessions.push(factory.open(id).await?);
        }

        let (done_tx, done) = mpsc::channel(size.max(1));
        let mut handles = Vec::with_capacity(size);

        for (id, (session, stats)) in sessions.into_iter().zip(collectors).enumerate() {
            let worker = Worker {
                id,
                session,
                executor: executor.clone(),
                stats,
                ops_executed: ops_executed.clone(),
                verbose,
            };
            let queue = queue.clone();
            let done_tx = done_tx.clone();

            handles.push(tokio::spawn(async move {
                worker.run(queue, done_tx).await;
            }));
        }

        Ok(Self {
            handles,
            done,
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Wait for every worker's completion signal. Returns how many were
    /// received, which is the pool size unless a worker panicked.
    pub async fn wait(mut self) -> usize {
        let mut received = 0;
        while received < self.size {
            match self.done.recv().await {
                Some(_) => received += 1,
                None => break,
            }
        }

        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Worker task failed: {e}");
            }
        }
        received
    }
}

// ─── Worker loop ─────────────────────────────────────────────────

struct Worker<S, E> {
    id: usize,
    session: S,
    executor: Arc<E>,
    stats: StatsCollector,
    ops_executed: Arc<AtomicU64>,
    verbose: bool,
}

impl<S, E> Worker<S, E>
where
    S: Session,
    E: OpsExecutor<S>,
{
    async fn run(mut self, queue: async_channel::Receiver<QueueItem>, done: mpsc::Sender<usize>) {
        info!("Worker #{} report for duty", self.id);

        // A closed queue counts as a stop signal too.
        while let Ok(Some(op)) = queue.recv().await {
            let t0 = Instant::now();
            let (outcome, retried) =
                execute_with_retry(&mut self.session, self.executor.as_ref(), &op).await;
            let elapsed = t0.elapsed();

            // Collector before the shared counter: readers take the
            // counter first and must never see it ahead of the sums.
            self.stats.record(op.op_type, elapsed, &outcome, retried);
            self.ops_executed.fetch_add(1, Ordering::Release);

            if self.verbose {
                if let Some(reason) = outcome.error() {
                    error!("Worker #{}: {} op failed: {reason}", self.id, op.op_type);
                }
            }
        }

        self.session.close().await;
        let _ = done.send(self.id).await;
        info!("Worker #{} done!", self.id);
    }
}

/// Run `op` once; on a transient failure refresh the session and run it
/// exactly once more. Returns the final outcome and whether a retry
/// happened.
pub async fn execute_with_retry<S, E>(
    session: &mut S,
    executor: &E,
    op: &Op,
) -> (Outcome, bool)
where
    S: Session,
    E: OpsExecutor<S> + ?Sized,
{
    let reason = match executor.execute(session, op).await {
        Outcome::Transient(reason) => reason,
        outcome => return (outcome, false),
    };

    if let Err(e) = session.refresh().await {
        warn!("Session refresh failed: {e}");
    }
    warn!("Retrying {} op after error: {reason}", op.op_type);
    (executor.execute(session, op).await, true)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::metrics::LatencySampler;
    use crate::ops::OpType;

    #[derive(Default)]
    struct CountingSession {
        refreshes: usize,
    }

    #[async_trait]
    impl Session for CountingSession {
        async fn refresh(&mut self) -> Result<()> {
            self.refreshes += 1;
            Ok(())
        }

        async fn close(&mut self) {}
    }

    /// Hands out scripted outcomes in order, `Success` once exhausted.
    struct Scripted {
        outcomes: Mutex<VecDeque<Outcome>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(outcomes: Vec<Outcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OpsExecutor<CountingSession> for Scripted {
        async fn execute(&self, _session: &mut CountingSession, _op: &Op) -> Outcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes.lock().pop_front().unwrap_or(Outcome::Success)
        }
    }

    fn op() -> Op {
        Op::new(0, OpType::Query, vec!["GET".into(), "k".into()])
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let exec = Scripted::new(vec![Outcome::Permanent("not found".into())]);
        let mut session = CountingSession::default();
        let (outcome, retried) = execute_with_retry(&mut session, &exec, &op()).await;
        assert_eq!(outcome, Outcome::Permanent("not found".into()));
        assert!(!retried);
        assert_eq!(exec.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.refreshes, 0);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let exec = Scripted::new(vec![Outcome::Transient("reset".into())]);
        let mut session = CountingSession::default();
        let (outcome, retried) = execute_with_retry(&mut session, &exec, &op()).await;
        assert!(outcome.is_success());
        assert!(retried);
        assert_eq!(exec.calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.refreshes, 1);
    }

    #[tokio::test]
    async fn second_transient_failure_is_final() {
        let exec = Scripted::new(vec![
            Outcome::Transient("reset".into()),
            Outcome::Transient("reset again".into()),
        ]);
        let mut session = CountingSession::default();
        let (outcome, _) = execute_with_retry(&mut session, &exec, &op()).await;
        assert_eq!(outcome, Outcome::Transient("reset again".into()));
        assert_eq!(exec.calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.refreshes, 1);
    }

    struct CountingFactory;

    #[async_trait]
    impl SessionFactory for CountingFactory {
        type Session = CountingSession;

        async fn open(&self, _worker_id: usize) -> Result<CountingSession> {
            Ok(CountingSession::default())
        }
    }

    #[tokio::test]
    async fn pool_drains_queue_and_signals_each_worker() {
        let (tx, rx) = async_channel::bounded(16);
        let total = Arc::new(AtomicU64::new(0));
        let collectors: Vec<StatsCollector> = (0..3)
            .map(|_| StatsCollector::new(LatencySampler::disabled()))
            .collect();
        let counters: Vec<_> = collectors.iter().map(|c| c.counters()).collect();
        let exec = Arc::new(Scripted::new(vec![Outcome::Transient("io".into())]));

        let pool = WorkerPool::start(&CountingFactory, exec.clone(), rx, total.clone(), collectors, false)
            .await
            .unwrap();

        for _ in 0..7 {
            tx.send(Some(op())).await.unwrap();
        }
        for _ in 0..pool.size() {
            tx.send(None).await.unwrap();
        }

        assert_eq!(pool.wait().await, 3);
        assert_eq!(total.load(Ordering::SeqCst), 7);
        let counted: u64 = counters.iter().map(|c| c.snapshot().total).sum();
        assert_eq!(counted, 7);
        // one op hit the transient failure and was executed twice
        assert_eq!(exec.calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn closed_queue_stops_workers() {
        let (tx, rx) = async_channel::bounded::<QueueItem>(4);
        let collectors = vec![
            StatsCollector::new(LatencySampler::disabled()),
            StatsCollector::new(LatencySampler::disabled()),
        ];
        let pool = WorkerPool::start(
            &CountingFactory,
            Arc::new(Scripted::new(vec![])),
            rx,
            Arc::new(AtomicU64::new(0)),
            collectors,
            false,
        )
        .await
        .unwrap();

        tx.close();
        assert_eq!(pool.wait().await, 2);
    }
}
