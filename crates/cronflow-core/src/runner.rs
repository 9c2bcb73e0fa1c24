//! Workflow runner: ordered step execution with retry budget and resume.
//!
//! State machine: `Pending -> Running -> {Succeeded, Failed}`. Terminal
//! instances are never re-executed -- `execute` on one returns the cached
//! terminal status. Resume after a crash is the same code path as first
//! execution; the only difference is how many steps return instantly from
//! the ledger.
//!
//! The runner owns all retry decisions: a transient failure re-enters the
//! step sequence at the first incomplete step (completed work is
//! preserved) after an exponential backoff, up to the workflow's retry
//! budget. A permanent failure, or an exhausted budget, pins the instance
//! to `Failed` -- a terminal state requiring external intervention.

use std::sync::Arc;

use cronflow_types::error::RepositoryError;
use cronflow_types::instance::{InstanceStatus, WorkflowInstance};
use dashmap::DashMap;
use serde_json::Value;

use crate::executor::{ExecutorError, StepExecutor, TransactionExecutor};
use crate::ledger::Ledger;
use crate::repository::{InstanceRepository, LedgerRepository};
use crate::step::{StepAction, StepContext, WorkflowDefinition};

// ---------------------------------------------------------------------------
// RunOutcome
// ---------------------------------------------------------------------------

/// Terminal result of one `execute` call.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub instance_id: String,
    pub status: InstanceStatus,
    /// Workflow attempts consumed by this call (0 when cached).
    pub attempts: u32,
    /// True when the instance was already terminal and nothing ran.
    pub cached: bool,
}

// ---------------------------------------------------------------------------
// RunnerError
// ---------------------------------------------------------------------------

/// Errors that prevent the runner from reaching a terminal status.
///
/// Business step failures are not runner errors -- they resolve to a
/// `Failed` instance and a normal `RunOutcome`.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("workflow instance not found: {0}")]
    InstanceNotFound(String),

    /// Another worker in this process is already executing the instance.
    /// Cross-process duplicates are harmless (they replay and converge),
    /// but in-process we can cheaply refuse.
    #[error("instance already executing: {0}")]
    AlreadyExecuting(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// WorkflowRunner
// ---------------------------------------------------------------------------

/// Executes workflow instances against the ledger and instance store.
pub struct WorkflowRunner<L: LedgerRepository, I: InstanceRepository> {
    steps: StepExecutor<L>,
    transactions: TransactionExecutor<L>,
    instances: Arc<I>,
    in_flight: Arc<DashMap<String, ()>>,
}

/// Removes the in-flight claim when execution finishes, however it ends.
struct InFlightGuard {
    map: Arc<DashMap<String, ()>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

impl<L: LedgerRepository, I: InstanceRepository> WorkflowRunner<L, I> {
    pub fn new(ledger_repo: Arc<L>, instances: Arc<I>) -> Self {
        let ledger = Arc::new(Ledger::new(Arc::clone(&ledger_repo)));
        Self {
            steps: StepExecutor::new(ledger),
            transactions: TransactionExecutor::new(ledger_repo),
            instances,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Execute (or resume) the given instance to a terminal status.
    pub async fn execute(
        &self,
        instance_id: &str,
        workflow: &WorkflowDefinition<L::Txn>,
    ) -> Result<RunOutcome, RunnerError> {
        let _guard = self
            .try_claim(instance_id)
            .ok_or_else(|| RunnerError::AlreadyExecuting(instance_id.to_string()))?;

        let instance = self
            .instances
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| RunnerError::InstanceNotFound(instance_id.to_string()))?;

        if instance.status.is_terminal() {
            tracing::debug!(
                instance_id,
                status = %instance.status,
                "instance already terminal, returning cached result"
            );
            return Ok(RunOutcome {
                instance_id: instance_id.to_string(),
                status: instance.status,
                attempts: 0,
                cached: true,
            });
        }

        self.instances.mark_running(instance_id).await?;
        tracing::info!(
            instance_id,
            job_id = instance.job_id.as_str(),
            workflow = workflow.name.as_str(),
            "executing workflow instance"
        );

        let mut attempt = 1;
        loop {
            match self.run_steps(&instance, workflow, attempt).await {
                Ok(()) => {
                    self.instances
                        .mark_terminal(instance_id, InstanceStatus::Succeeded, None)
                        .await?;
                    tracing::info!(instance_id, attempts = attempt, "workflow succeeded");
                    return Ok(RunOutcome {
                        instance_id: instance_id.to_string(),
                        status: InstanceStatus::Succeeded,
                        attempts: attempt,
                        cached: false,
                    });
                }
                Err(e) if e.is_permanent() => {
                    let msg = e.to_string();
                    tracing::warn!(instance_id, error = msg.as_str(), "permanent step failure");
                    self.instances
                        .mark_terminal(instance_id, InstanceStatus::Failed, Some(&msg))
                        .await?;
                    return Ok(RunOutcome {
                        instance_id: instance_id.to_string(),
                        status: InstanceStatus::Failed,
                        attempts: attempt,
                        cached: false,
                    });
                }
                Err(e) if workflow.retry.should_retry(attempt) => {
                    let delay = workflow.retry.delay_after(attempt);
                    tracing::warn!(
                        instance_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    let msg = format!("retry budget exhausted after {attempt} attempts: {e}");
                    tracing::error!(instance_id, attempts = attempt, error = %e, "workflow failed");
                    self.instances
                        .mark_terminal(instance_id, InstanceStatus::Failed, Some(&msg))
                        .await?;
                    return Ok(RunOutcome {
                        instance_id: instance_id.to_string(),
                        status: InstanceStatus::Failed,
                        attempts: attempt,
                        cached: false,
                    });
                }
            }
        }
    }

    /// One pass over the step sequence in declaration order. Completed
    /// steps return instantly from the ledger, so resuming and first
    /// execution share this code path.
    async fn run_steps(
        &self,
        instance: &WorkflowInstance,
        workflow: &WorkflowDefinition<L::Txn>,
        attempt: u32,
    ) -> Result<(), ExecutorError> {
        let mut outputs: Vec<Value> = Vec::with_capacity(workflow.steps.len());

        for (index, step) in workflow.steps.iter().enumerate() {
            let step_index = index as u32;
            let ctx = StepContext::new(
                instance.instance_id.clone(),
                instance.job_id.clone(),
                instance.scheduled_time,
                attempt,
                instance.input.clone(),
                outputs.clone(),
            );

            let output = match &step.action {
                StepAction::Step(action) => {
                    self.steps
                        .run_step(&instance.instance_id, step_index, action, ctx)
                        .await?
                }
                StepAction::Transaction(mutation) => {
                    self.transactions
                        .run_transaction(&instance.instance_id, step_index, mutation, ctx)
                        .await?
                }
            };

            tracing::debug!(
                instance_id = instance.instance_id.as_str(),
                step = step.name.as_str(),
                step_index,
                "step complete"
            );
            outputs.push(output);
        }

        Ok(())
    }

    fn try_claim(&self, instance_id: &str) -> Option<InFlightGuard> {
        use dashmap::mapref::entry::Entry;
        match self.in_flight.entry(instance_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(InFlightGuard {
                    map: Arc::clone(&self.in_flight),
                    key: instance_id.to_string(),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
