//! Tick evaluation loop with storage-level dedup.
//!
//! The scheduler wakes on a fixed interval, truncates the wall clock to
//! whole seconds, and evaluates every registered cron expression against
//! that tick. A matching (job, tick) pair derives its deterministic
//! instance id and races an insert; the storage uniqueness constraint
//! makes "exactly one instance per tick" hold across any number of
//! scheduler processes. The per-job last-tick map is only a local
//! shortcut to avoid re-deriving ids inside one process; correctness
//! never depends on it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use cronflow_types::error::RepositoryError;
use cronflow_types::instance::WorkflowInstance;

use crate::instance_id::derive_instance_id;
use crate::registry::{JobRegistry, RegisteredJob};
use crate::repository::{InstanceRepository, LedgerRepository};
use crate::runner::{RunOutcome, RunnerError, WorkflowRunner};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the loop samples the clock. One second matches the
    /// finest cron granularity.
    pub tick_interval: Duration,
    /// Concurrent workflow executions dispatched by this scheduler.
    pub max_concurrent_runs: usize,
    /// When set, scan this far back on startup and dispatch any tick
    /// that has no instance yet (missed while the process was down).
    pub catch_up_window: Option<chrono::Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_concurrent_runs: 8,
            catch_up_window: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// What happened to one (job, tick) dispatch.
#[derive(Debug)]
pub enum TickOutcome {
    /// This scheduler won the insert race and ran the instance.
    Started(RunOutcome),
    /// An instance for this tick already exists (created by another
    /// process, an earlier pass, or a concurrent dispatch). Normal.
    Duplicate,
}

/// Drop sub-second precision; tick identity is whole seconds.
pub fn truncate_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_nanosecond(0).unwrap_or(t)
}

// ---------------------------------------------------------------------------
// CronScheduler
// ---------------------------------------------------------------------------

/// Drives registered cron jobs against the clock.
pub struct CronScheduler<L: LedgerRepository, I: InstanceRepository> {
    registry: Arc<JobRegistry<L::Txn>>,
    runner: Arc<WorkflowRunner<L, I>>,
    instances: Arc<I>,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
    last_ticks: DashMap<String, DateTime<Utc>>,
    shutdown: CancellationToken,
}

impl<L, I> CronScheduler<L, I>
where
    L: LedgerRepository + 'static,
    I: InstanceRepository + 'static,
{
    pub fn new(
        registry: Arc<JobRegistry<L::Txn>>,
        runner: Arc<WorkflowRunner<L, I>>,
        instances: Arc<I>,
        config: SchedulerConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_runs));
        Self {
            registry,
            runner,
            instances,
            config,
            permits,
            last_ticks: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the loop when cancelled. In-flight executions
    /// finish; instances interrupted mid-run resume on the next start.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the scheduling loop until the shutdown token fires.
    pub async fn run(self: Arc<Self>) -> Result<(), SchedulerError> {
        if let Some(window) = self.config.catch_up_window {
            self.catch_up(window).await?;
        }

        tracing::info!(
            jobs = self.registry.len(),
            tick_interval_ms = self.config.tick_interval.as_millis() as u64,
            "cron scheduler started"
        );

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("cron scheduler stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let tick = truncate_to_second(Utc::now());
                    self.evaluate_tick(tick);
                }
            }
        }
    }

    /// Evaluate one tick against every job, spawning dispatches for
    /// matches. Never blocks the loop on execution.
    fn evaluate_tick(self: &Arc<Self>, tick: DateTime<Utc>) {
        for job in self.registry.jobs() {
            if !job.matches(tick) {
                continue;
            }
            // Interval jitter can evaluate the same second twice locally.
            let previous = self.last_ticks.insert(job.definition.job_id.clone(), tick);
            if previous == Some(tick) {
                continue;
            }

            let scheduler = Arc::clone(self);
            let job = job.clone();
            tokio::spawn(async move {
                let Ok(_permit) = Arc::clone(&scheduler.permits).acquire_owned().await else {
                    return;
                };
                match scheduler.handle_tick(&job, tick).await {
                    Ok(TickOutcome::Started(outcome)) => {
                        tracing::debug!(
                            job_id = job.definition.job_id.as_str(),
                            instance_id = outcome.instance_id.as_str(),
                            status = %outcome.status,
                            "tick dispatch finished"
                        );
                    }
                    Ok(TickOutcome::Duplicate) => {}
                    Err(e) => {
                        tracing::error!(
                            job_id = job.definition.job_id.as_str(),
                            error = %e,
                            "tick dispatch failed"
                        );
                    }
                }
            });
        }
    }

    /// Create-and-run for one (job, tick) pair. The insert race decides
    /// ownership: whoever gets `true` back executes, everyone else sees
    /// `Duplicate`.
    pub async fn handle_tick(
        &self,
        job: &RegisteredJob<L::Txn>,
        tick: DateTime<Utc>,
    ) -> Result<TickOutcome, SchedulerError> {
        let instance_id = derive_instance_id(&job.definition.job_id, tick);
        let instance = WorkflowInstance::pending(
            instance_id.clone(),
            job.definition.job_id.clone(),
            job.workflow.name.clone(),
            Value::Null,
            tick,
        );

        if !self.instances.insert_instance(&instance).await? {
            tracing::debug!(
                job_id = job.definition.job_id.as_str(),
                instance_id = instance_id.as_str(),
                "tick already owned by another instance"
            );
            return Ok(TickOutcome::Duplicate);
        }

        tracing::info!(
            job_id = job.definition.job_id.as_str(),
            instance_id = instance_id.as_str(),
            scheduled_time = %tick,
            "dispatching cron tick"
        );
        match self.runner.execute(&instance_id, &job.workflow).await {
            Ok(outcome) => Ok(TickOutcome::Started(outcome)),
            Err(RunnerError::AlreadyExecuting(_)) => Ok(TickOutcome::Duplicate),
            Err(e) => Err(e.into()),
        }
    }

    /// Manually trigger a job now, outside its cron schedule. Uses the
    /// same derivation as the loop, so a manual trigger in the same
    /// second as a cron tick converges on one instance. If the instance
    /// already exists the stored input wins and `input` is ignored.
    pub async fn trigger_now(
        &self,
        job_id: &str,
        input: Value,
    ) -> Result<RunOutcome, SchedulerError> {
        let job = self
            .registry
            .get(job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;

        let tick = truncate_to_second(Utc::now());
        let instance_id = derive_instance_id(job_id, tick);
        let instance = WorkflowInstance::pending(
            instance_id.clone(),
            job_id.to_string(),
            job.workflow.name.clone(),
            input,
            tick,
        );
        let created = self.instances.insert_instance(&instance).await?;
        tracing::info!(
            job_id,
            instance_id = instance_id.as_str(),
            created,
            "manual trigger"
        );

        Ok(self.runner.execute(&instance_id, &job.workflow).await?)
    }

    /// Dispatch ticks missed while the process was down. Existing
    /// instances (including terminal ones) short-circuit as duplicates,
    /// so the scan is safe to run on every start.
    async fn catch_up(&self, window: chrono::Duration) -> Result<(), SchedulerError> {
        let now = truncate_to_second(Utc::now());
        let from = now - window;
        let mut dispatched = 0usize;

        for job in self.registry.jobs() {
            for next in job.cron.iter_after(from) {
                if next >= now {
                    break;
                }
                match self.handle_tick(job, truncate_to_second(next)).await? {
                    TickOutcome::Started(_) => dispatched += 1,
                    TickOutcome::Duplicate => {}
                }
            }
        }

        if dispatched > 0 {
            tracing::warn!(
                dispatched,
                window_secs = window.num_seconds(),
                "caught up missed cron ticks"
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
