use tracing::info;

use crate::error::Result;

use super::{Op, OpsReader};

/// Endless view over a recording: when the inner reader runs dry a fresh
/// one is built from `factory` and replay starts over.
///
/// Timestamps are rebased so they keep increasing across cycles. A new
/// cycle begins one average inter-op gap after the last op of the
/// previous one, which keeps timed replay pacing continuous.
///
/// Seeking (`set_start_time`, `skip_ops`) only affects the cycle that is
/// current when it is called; later cycles replay the whole recording.
pub struct CyclicOpsReader<F> {
    factory: F,
    current: Box<dyn OpsReader>,
    cycle: u64,
    /// Raw timestamp of the first op of the current cycle.
    cycle_first_raw: Option<u64>,
    /// Rebased timestamp assigned to that first op.
    cycle_base: Option<u64>,
    last_rebased: Option<u64>,
    ops_in_cycle: u64,
}

impl<F> CyclicOpsReader<F>
where
    F: FnMut() -> Result<Box<dyn OpsReader>> + Send,
{
    pub fn new(mut factory: F) -> Result<Self> {
        let current = factory()?;
        Ok(Self {
            factory,
            current,
            cycle: 0,
            cycle_first_raw: None,
            cycle_base: None,
            last_rebased: None,
            ops_in_cycle: 0,
        })
    }

    /// Number of completed passes over the recording.
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    fn rebase(&mut self, mut op: Op) -> Op {
        let first_raw = *self.cycle_first_raw.get_or_insert(op.timestamp);
        let base = *self.cycle_base.get_or_insert(op.timestamp);
        op.timestamp = base + op.timestamp.saturating_sub(first_raw);
        self.last_rebased = Some(op.timestamp);
        self.ops_in_cycle += 1;
        op
    }

    fn restart(&mut self) -> Result<()> {
        let next_base = match (self.cycle_base, self.last_rebased) {
            (Some(base), Some(last)) => {
                let gap = if self.ops_in_cycle > 1 {
                    (last - base) / (self.ops_in_cycle - 1)
                } else {
                    0
                };
                Some(last + gap)
            }
            _ => None,
        };

        self.current = (self.factory)()?;
        self.cycle += 1;
        self.cycle_first_raw = None;
        self.cycle_base = next_base;
        self.ops_in_cycle = 0;
        info!("Ops source exhausted, starting replay cycle #{}", self.cycle);
        Ok(())
    }
}

impl<F> OpsReader for CyclicOpsReader<F>
where
    F: FnMut() -> Result<Box<dyn OpsReader>> + Send,
{
    fn next_op(&mut self) -> Result<Option<Op>> {
        if let Some(op) = self.current.next_op()? {
            return Ok(Some(self.rebase(op)));
        }

        // A fresh cycle that yields nothing means the recording itself
        // is empty; stop rather than restart forever.
        self.restart()?;
        match self.current.next_op()? {
            Some(op) => Ok(Some(self.rebase(op))),
            None => Ok(None),
        }
    }

    fn set_start_time(&mut self, start_ms: u64) -> Result<usize> {
        self.current.set_start_time(start_ms)
    }

    fn skip_ops(&mut self, n: usize) -> Result<()> {
        self.current.skip_ops(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{MemoryOpsReader, OpType};

    fn recording(ts: &[u64]) -> impl FnMut() -> Result<Box<dyn OpsReader>> + Send {
        let ops: Vec<Op> = ts
            .iter()
            .map(|&t| Op::new(t, OpType::Update, vec![]))
            .collect();
        move || Ok(Box::new(MemoryOpsReader::new(ops.clone())) as Box<dyn OpsReader>)
    }

    #[test]
    fn wraps_and_rebases_timestamps() {
        let mut r = CyclicOpsReader::new(recording(&[100, 110, 120])).unwrap();
        let ts: Vec<u64> = (0..7)
            .map(|_| r.next_op().unwrap().unwrap().timestamp)
            .collect();
        assert_eq!(ts, vec![100, 110, 120, 130, 140, 150, 160]);
        assert_eq!(r.cycles(), 2);
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let mut r = CyclicOpsReader::new(recording(&[5, 5, 9, 40])).unwrap();
        let mut prev = 0;
        for _ in 0..20 {
            let t = r.next_op().unwrap().unwrap().timestamp;
            assert!(t >= prev);
            prev = t;
        }
    }

    #[test]
    fn empty_recording_terminates() {
        let mut r = CyclicOpsReader::new(recording(&[])).unwrap();
        assert!(r.next_op().unwrap().is_none());
    }

    #[test]
    fn seek_applies_to_first_cycle_only() {
        let mut r = CyclicOpsReader::new(recording(&[0, 10, 20])).unwrap();
        r.set_start_time(10).unwrap();
        let ts: Vec<u64> = (0..5)
            .map(|_| r.next_op().unwrap().unwrap().timestamp)
            .collect();
        // second cycle replays from the very first op again
        assert_eq!(ts, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn skip_past_end_restarts_cycle() {
        let mut r = CyclicOpsReader::new(recording(&[0, 10, 20])).unwrap();
        r.skip_ops(3).unwrap();
        let ts: Vec<u64> = (0..4)
            .map(|_| r.next_op().unwrap().unwrap().timestamp)
            .collect();
        assert_eq!(ts, vec![0, 10, 20, 30]);
        assert_eq!(r.cycles(), 2);
    }

    #[test]
    fn seek_past_end_restarts_cycle() {
        let mut r = CyclicOpsReader::new(recording(&[0, 10, 20])).unwrap();
        assert_eq!(r.set_start_time(1000).unwrap(), 3);
        let first = r.next_op().unwrap().unwrap();
        assert_eq!(first.timestamp, 0);
        assert_eq!(r.cycles(), 1);
    }
}
