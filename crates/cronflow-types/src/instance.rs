//! Workflow instance types.
//!
//! A `WorkflowInstance` is one execution attempt-series of a workflow for
//! one trigger. Its `instance_id` is derived deterministically from
//! (job id, scheduled tick time), which is what makes "exactly once per
//! tick" hold across crashes and redundant scheduler replicas: re-deriving
//! the same id finds the same row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// InstanceStatus
// ---------------------------------------------------------------------------

/// Overall status of a workflow instance.
///
/// State machine: `Pending -> Running -> {Succeeded, Failed}`. Terminal
/// states are permanent; a terminal instance is never re-executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl InstanceStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Running => "running",
            InstanceStatus::Succeeded => "succeeded",
            InstanceStatus::Failed => "failed",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InstanceStatus::Pending),
            "running" => Some(InstanceStatus::Running),
            "succeeded" => Some(InstanceStatus::Succeeded),
            "failed" => Some(InstanceStatus::Failed),
            _ => None,
        }
    }

    /// Whether this status permits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Succeeded | InstanceStatus::Failed)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// WorkflowInstance
// ---------------------------------------------------------------------------

/// One execution of a workflow for one trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Deterministically derived identity (see `cronflow-core::instance_id`).
    pub instance_id: String,
    /// The cron job that produced this instance.
    pub job_id: String,
    /// Name of the workflow definition to execute.
    pub workflow_name: String,
    pub status: InstanceStatus,
    /// Workflow input payload.
    pub input: Value,
    /// The cron tick this instance was created for.
    pub scheduled_time: DateTime<Utc>,
    pub started_time: Option<DateTime<Utc>>,
    pub ended_time: Option<DateTime<Utc>>,
    /// Terminal error message, present only when `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowInstance {
    /// Build a fresh `Pending` instance for a scheduled tick.
    pub fn pending(
        instance_id: String,
        job_id: String,
        workflow_name: String,
        input: Value,
        scheduled_time: DateTime<Utc>,
    ) -> Self {
        Self {
            instance_id,
            job_id,
            workflow_name,
            status: InstanceStatus::Pending,
            input,
            scheduled_time,
            started_time: None,
            ended_time: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            InstanceStatus::Pending,
            InstanceStatus::Running,
            InstanceStatus::Succeeded,
            InstanceStatus::Failed,
        ] {
            assert_eq!(InstanceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(InstanceStatus::parse("paused"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(InstanceStatus::Succeeded.is_terminal());
        assert!(InstanceStatus::Failed.is_terminal());
        assert!(!InstanceStatus::Pending.is_terminal());
        assert!(!InstanceStatus::Running.is_terminal());
    }

    #[test]
    fn test_pending_constructor() {
        let inst = WorkflowInstance::pending(
            "abc".to_string(),
            "prices".to_string(),
            "record-prices".to_string(),
            Value::Null,
            Utc::now(),
        );
        assert_eq!(inst.status, InstanceStatus::Pending);
        assert!(inst.started_time.is_none());
        assert!(inst.error.is_none());
    }
}
