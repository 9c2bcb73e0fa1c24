//! Ledger step record types.
//!
//! A `StepRecord` is the durable proof that one (instance, step) pair
//! completed, together with its serialized output. The ledger stores only
//! completed records -- an absent row means the step has not started. A
//! record is written exactly once and never deleted; replays read it back
//! instead of re-running the step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// StepKind
// ---------------------------------------------------------------------------

/// The kind of a workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Non-transactional unit of work (e.g. a network call). Executed
    /// effectively-once: the completion record commits after the action,
    /// so a crash in between re-runs the action on replay.
    Step,
    /// Unit of work whose data mutation commits atomically with its
    /// completion record.
    Transaction,
}

impl StepKind {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Step => "step",
            StepKind::Transaction => "transaction",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "step" => Some(StepKind::Step),
            "transaction" => Some(StepKind::Transaction),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one step position within an instance, as reported to callers.
///
/// Only `Completed` is materialized in storage; `NotStarted` is the absence
/// of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    NotStarted,
    Completed,
}

// ---------------------------------------------------------------------------
// StepRecord
// ---------------------------------------------------------------------------

/// Durable completion record for one (instance, step) pair.
///
/// `step_index` is assigned at authoring time by declaration order, so
/// reordering step declarations in a workflow is a breaking change for
/// in-flight instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub instance_id: String,
    pub step_index: u32,
    pub kind: StepKind,
    /// Serialized step output, returned verbatim on replay.
    pub output: Value,
    pub completed_at: DateTime<Utc>,
}

impl StepRecord {
    /// Build a completion record stamped with the current time.
    pub fn completed(instance_id: &str, step_index: u32, kind: StepKind, output: Value) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            step_index,
            kind,
            output,
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_round_trip() {
        assert_eq!(StepKind::parse("step"), Some(StepKind::Step));
        assert_eq!(StepKind::parse("transaction"), Some(StepKind::Transaction));
        assert_eq!(StepKind::parse("txn"), None);
    }

    #[test]
    fn test_completed_record_carries_output() {
        let rec = StepRecord::completed("inst-1", 2, StepKind::Step, json!({"price": 187.2}));
        assert_eq!(rec.step_index, 2);
        assert_eq!(rec.output["price"], 187.2);
    }
}
