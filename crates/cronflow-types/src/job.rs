//! Cron job definitions.

use serde::{Deserialize, Serialize};

/// A registered cron job: a schedule bound to a workflow entry point.
///
/// Definitions are immutable for a process lifetime; they are collected
/// into a `JobRegistry` at startup and read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJobDefinition {
    /// Stable job identifier (e.g. "prices"). Part of the instance-id
    /// derivation, so renaming a job is a breaking change.
    pub job_id: String,
    /// Normalized 6-field cron expression (seconds first).
    pub cron_expression: String,
    /// Name of the workflow this job triggers.
    pub workflow_name: String,
}
