//! Process-lifetime cron job registry.
//!
//! Jobs are registered once at startup and the registry is immutable
//! afterwards; the scheduler never mutates it while running. Each entry
//! pairs a cron schedule (normalized to a 6-field expression) with the
//! workflow definition it triggers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cronflow_types::job::CronJobDefinition;

use crate::step::WorkflowDefinition;

// ---------------------------------------------------------------------------
// RegistryError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Invalid cron expression or schedule string.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A job with this id is already registered.
    #[error("duplicate job id: {0}")]
    DuplicateJob(String),
}

// ---------------------------------------------------------------------------
// Human-readable schedule normalization
// ---------------------------------------------------------------------------

/// Normalize a schedule string to a 6-field cron expression (with seconds).
///
/// Accepts standard cron (5-field gets "0" prepended for seconds, 6-field
/// passes through) and a few human-readable forms, case-insensitive:
/// "every N seconds/minutes/hours", "every minute/hour/day",
/// "every day at HH:MM", "minutely", "hourly", "daily".
pub fn normalize_schedule(input: &str) -> Result<String, RegistryError> {
    let trimmed = input.trim();

    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    if parts.len() == 5 {
        return Ok(format!("0 {trimmed}"));
    }
    if parts.len() == 6 {
        return Ok(trimmed.to_string());
    }

    let lower = trimmed.to_lowercase();

    if lower == "every minute" || lower == "minutely" {
        return Ok("0 * * * * *".to_string());
    }
    if lower == "every hour" || lower == "hourly" {
        return Ok("0 0 * * * *".to_string());
    }
    if lower == "every day" || lower == "daily" {
        return Ok("0 0 0 * * *".to_string());
    }

    if let Some(rest) = lower.strip_prefix("every ") {
        if let Some(at_part) = rest.strip_prefix("day at ") {
            let time_parts: Vec<&str> = at_part.split(':').collect();
            if time_parts.len() == 2 {
                let hour: u32 = time_parts[0]
                    .trim()
                    .parse()
                    .map_err(|_| RegistryError::InvalidSchedule(input.to_string()))?;
                let minute: u32 = time_parts[1]
                    .trim()
                    .parse()
                    .map_err(|_| RegistryError::InvalidSchedule(input.to_string()))?;
                if hour < 24 && minute < 60 {
                    return Ok(format!("0 {minute} {hour} * * *"));
                }
            }
            return Err(RegistryError::InvalidSchedule(input.to_string()));
        }

        let words: Vec<&str> = rest.split_whitespace().collect();
        if words.len() == 2 {
            let n: u32 = words[0]
                .parse()
                .map_err(|_| RegistryError::InvalidSchedule(input.to_string()))?;
            if n == 0 {
                return Err(RegistryError::InvalidSchedule(
                    "interval must be > 0".to_string(),
                ));
            }
            let unit = words[1].trim_end_matches('s');
            return match unit {
                "second" => Ok(format!("*/{n} * * * * *")),
                "minute" => Ok(format!("0 */{n} * * * *")),
                "hour" => Ok(format!("0 0 */{n} * * *")),
                _ => Err(RegistryError::InvalidSchedule(input.to_string())),
            };
        }
    }

    Err(RegistryError::InvalidSchedule(format!(
        "unrecognized schedule format: '{trimmed}'"
    )))
}

// ---------------------------------------------------------------------------
// RegisteredJob
// ---------------------------------------------------------------------------

/// One registered cron job: definition, parsed schedule, and workflow.
pub struct RegisteredJob<T> {
    pub definition: CronJobDefinition,
    pub cron: croner::Cron,
    pub workflow: Arc<WorkflowDefinition<T>>,
}

impl<T> RegisteredJob<T> {
    /// Whether the schedule fires at `tick` (already truncated to seconds).
    pub fn matches(&self, tick: DateTime<Utc>) -> bool {
        matches!(self.cron.is_time_matching(&tick), Ok(true))
    }
}

impl<T> Clone for RegisteredJob<T> {
    fn clone(&self) -> Self {
        Self {
            definition: self.definition.clone(),
            cron: self.cron.clone(),
            workflow: Arc::clone(&self.workflow),
        }
    }
}

// ---------------------------------------------------------------------------
// JobRegistry
// ---------------------------------------------------------------------------

/// Immutable set of registered jobs, keyed by job id.
pub struct JobRegistry<T> {
    jobs: HashMap<String, RegisteredJob<T>>,
}

impl<T> JobRegistry<T> {
    pub fn builder() -> JobRegistryBuilder<T> {
        JobRegistryBuilder { jobs: HashMap::new() }
    }

    pub fn jobs(&self) -> impl Iterator<Item = &RegisteredJob<T>> {
        self.jobs.values()
    }

    pub fn get(&self, job_id: &str) -> Option<&RegisteredJob<T>> {
        self.jobs.get(job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Builder for the job registry; the only way jobs get in.
pub struct JobRegistryBuilder<T> {
    jobs: HashMap<String, RegisteredJob<T>>,
}

impl<T> JobRegistryBuilder<T> {
    /// Register a job. The schedule may be standard cron or a
    /// human-readable form (see `normalize_schedule`).
    pub fn register(
        mut self,
        job_id: impl Into<String>,
        schedule: &str,
        workflow: WorkflowDefinition<T>,
    ) -> Result<Self, RegistryError> {
        let job_id = job_id.into();
        if self.jobs.contains_key(&job_id) {
            return Err(RegistryError::DuplicateJob(job_id));
        }

        let cron_expression = normalize_schedule(schedule)?;
        let cron = cron_expression
            .parse::<croner::Cron>()
            .map_err(|e| RegistryError::InvalidSchedule(e.to_string()))?;

        let definition = CronJobDefinition {
            job_id: job_id.clone(),
            cron_expression,
            workflow_name: workflow.name.clone(),
        };
        tracing::info!(
            job_id = definition.job_id.as_str(),
            schedule = definition.cron_expression.as_str(),
            workflow = definition.workflow_name.as_str(),
            "registered cron job"
        );
        self.jobs.insert(
            job_id,
            RegisteredJob {
                definition,
                cron,
                workflow: Arc::new(workflow),
            },
        );
        Ok(self)
    }

    pub fn build(self) -> JobRegistry<T> {
        JobRegistry { jobs: self.jobs }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
