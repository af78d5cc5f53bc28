//! Replays recorded database operations against a live Redis server,
//! either as fast as possible or with the recorded timing, and reports
//! throughput and per-op-type latency percentiles while it runs.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod ops;
pub mod replay;
pub mod session;
pub mod worker;

pub use config::{ReplayConfig, Style};
pub use error::{ReplayError, Result};
pub use ops::{Op, OpType, OpsReader};
pub use session::{OpsExecutor, Outcome, Session, SessionFactory};
