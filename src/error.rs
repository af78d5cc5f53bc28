use std::path::PathBuf;

use thiserror::Error;

// ─── Unified error type ──────────────────────────────────────────

/// Everything that can stop a replay run before or while it starts.
///
/// Per-op failures are not represented here: they are folded into an
/// [`Outcome`](crate::session::Outcome) and handled inside the worker.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Rejected configuration (bad style, zero workers, rate out of range).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The ops file could not be opened or read.
    #[error("cannot read ops file {path}: {source}")]
    OpsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line of the ops file is not a valid op.
    #[error("malformed op on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Generic I/O failure outside the ops file (summary output etc).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Redis client or connection failure while opening a session.
    #[error("Redis: {0}")]
    Redis(#[from] redis::RedisError),

    /// Connecting took longer than the configured socket timeout.
    #[error("connection to {url} timed out after {timeout_ms}ms")]
    ConnectTimeout { url: String, timeout_ms: u64 },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Dispatcher or reporter task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ReplayError>;
