use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{ReplayError, Result};

use super::Op;

// ─── Op source contract ──────────────────────────────────────────

/// An ordered, replayable sequence of recorded ops.
///
/// Readers are driven from the dispatcher's blocking thread, so plain
/// synchronous I/O is fine here.
pub trait OpsReader: Send {
    /// Next op in recording order, `None` once the source is exhausted.
    fn next_op(&mut self) -> Result<Option<Op>>;

    /// Skip every op recorded strictly before `start_ms`.
    /// Returns how many ops were skipped.
    fn set_start_time(&mut self, start_ms: u64) -> Result<usize>;

    /// Drop the next `n` ops. Running out early is not an error.
    fn skip_ops(&mut self, n: usize) -> Result<()> {
        for _ in 0..n {
            if self.next_op()?.is_none() {
                break;
            }
        }
        Ok(())
    }
}

impl<R: OpsReader + ?Sized> OpsReader for Box<R> {
    fn next_op(&mut self) -> Result<Option<Op>> {
        (**self).next_op()
    }

    fn set_start_time(&mut self, start_ms: u64) -> Result<usize> {
        (**self).set_start_time(start_ms)
    }

    fn skip_ops(&mut self, n: usize) -> Result<()> {
        (**self).skip_ops(n)
    }
}

// ─── JSON-lines file reader ──────────────────────────────────────

/// Streams ops from a JSON-lines file without loading it into memory.
pub struct FileOpsReader {
    path: PathBuf,
    lines: BufReader<File>,
    line_no: usize,
    buf: String,
    /// Op read ahead by `set_start_time` that still has to be returned.
    pending: Option<Op>,
}

impl FileOpsReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| ReplayError::OpsFile {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            lines: BufReader::new(file),
            line_no: 0,
            buf: String::new(),
            pending: None,
        })
    }

    fn read_op(&mut self) -> Result<Option<Op>> {
        loop {
            self.buf.clear();
            let n = self
                .lines
                .read_line(&mut self.buf)
                .map_err(|source| ReplayError::OpsFile {
                    path: self.path.clone(),
                    source,
                })?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let line = self.buf.trim();
            if line.is_empty() {
                continue;
            }
            let op = serde_json::from_str(line).map_err(|source| ReplayError::Parse {
                line: self.line_no,
                source,
            })?;
            return Ok(Some(op));
        }
    }
}

impl OpsReader for FileOpsReader {
    fn next_op(&mut self) -> Result<Option<Op>> {
        match self.pending.take() {
            Some(op) => Ok(Some(op)),
            None => self.read_op(),
        }
    }

    fn set_start_time(&mut self, start_ms: u64) -> Result<usize> {
        let mut skipped = 0;
        while let Some(op) = self.next_op()? {
            if op.timestamp >= start_ms {
                self.pending = Some(op);
                break;
            }
            skipped += 1;
        }
        Ok(skipped)
    }
}

// ─── In-memory reader ────────────────────────────────────────────

/// Replays a pre-built list of ops. Handy for synthetic workloads.
#[derive(Debug, Clone, Default)]
pub struct MemoryOpsReader {
    ops: Vec<Op>,
    pos: usize,
}

impl MemoryOpsReader {
    pub fn new(ops: Vec<Op>) -> Self {
        Self { ops, pos: 0 }
    }
}

impl OpsReader for MemoryOpsReader {
    fn next_op(&mut self) -> Result<Option<Op>> {
        let op = self.ops.get(self.pos).cloned();
        if op.is_some() {
            self.pos += 1;
        }
        Ok(op)
    }

    fn set_start_time(&mut self, start_ms: u64) -> Result<usize> {
        let before = self.pos;
        while self
            .ops
            .get(self.pos)
            .is_some_and(|op| op.timestamp < start_ms)
        {
            self.pos += 1;
        }
        Ok(self.pos - before)
    }

    fn skip_ops(&mut self, n: usize) -> Result<()> {
        self.pos = (self.pos + n).min(self.ops.len());
        Ok(())
    }
}
