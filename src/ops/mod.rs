pub mod cyclic;
pub mod reader;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use cyclic::CyclicOpsReader;
pub use reader::{FileOpsReader, MemoryOpsReader, OpsReader};

// ─── Op types ────────────────────────────────────────────────────

pub const OP_TYPE_COUNT: usize = OpType::ALL.len();

/// The fixed set of operation kinds a recording can contain.
/// Stats are bucketed by this tag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    Insert,
    Query,
    Update,
    Remove,
    Count,
    Command,
}

impl OpType {
    pub const ALL: [OpType; 6] = [
        OpType::Insert,
        OpType::Query,
        OpType::Update,
        OpType::Remove,
        OpType::Count,
        OpType::Command,
    ];

    /// Dense index into per-type counter arrays.
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            OpType::Insert => "insert",
            OpType::Query => "query",
            OpType::Update => "update",
            OpType::Remove => "remove",
            OpType::Count => "count",
            OpType::Command => "command",
        }
    }

    /// Reads expect a value back; a nil reply means "not found".
    pub const fn expects_reply(self) -> bool {
        matches!(self, OpType::Query | OpType::Count)
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Recorded op ─────────────────────────────────────────────────

/// One recorded operation, as stored one-per-line in the ops file:
///
/// ```json
/// {"ts": 1396456709419, "op": "query", "cmd": ["HGETALL", "user:usr_00000042"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Op {
    /// Capture time, unix milliseconds.
    #[serde(rename = "ts")]
    pub timestamp: u64,

    #[serde(rename = "op")]
    pub op_type: OpType,

    /// Raw command arguments handed to the executor untouched.
    #[serde(default)]
    pub cmd: Vec<String>,
}

impl Op {
    pub fn new(timestamp: u64, op_type: OpType, cmd: Vec<String>) -> Self {
        Self {
            timestamp,
            op_type,
            cmd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recorded_line() {
        let op: Op = serde_json::from_str(
            r#"{"ts": 1396456709419, "op": "query", "cmd": ["HGETALL", "user:1"]}"#,
        )
        .unwrap();
        assert_eq!(op.timestamp, 1_396_456_709_419);
        assert_eq!(op.op_type, OpType::Query);
        assert_eq!(op.cmd, vec!["HGETALL", "user:1"]);
    }

    #[test]
    fn missing_cmd_defaults_to_empty() {
        let op: Op = serde_json::from_str(r#"{"ts": 5, "op": "command"}"#).unwrap();
        assert!(op.cmd.is_empty());
    }

    #[test]
    fn unknown_op_type_is_rejected() {
        let res: Result<Op, _> = serde_json::from_str(r#"{"ts": 5, "op": "getmore"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn indices_are_dense() {
        for (i, t) in OpType::ALL.iter().enumerate() {
            assert_eq!(t.index(), i);
        }
    }
}
