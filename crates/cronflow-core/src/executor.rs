//! Step executors.
//!
//! Two flavors, matching the two step kinds:
//!
//! - `StepExecutor` runs a non-transactional action through the ledger.
//!   The action is effectively-once: if the process dies after the action
//!   succeeds but before the completion record commits, replay runs the
//!   action again. Callers whose action is not naturally idempotent must
//!   make it so (e.g. a request-deduplication key) if strict exactly-once
//!   is required.
//! - `TransactionExecutor` runs a mutation whose writes commit atomically
//!   with the completion record, retrying bounded times on storage
//!   conflicts before surfacing the failure.
//!
//! Neither executor retries business failures; those propagate to the
//! runner, which owns the workflow-level retry budget.

use std::sync::Arc;
use std::time::Duration;

use cronflow_types::error::{RepositoryError, StepFailure};
use cronflow_types::step::StepKind;
use serde_json::Value;

use crate::ledger::Ledger;
use crate::repository::{LedgerRepository, TxnMutation, TxnOutcome};
use crate::step::{StepContext, StepFn, TxnFn};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Attempts for a transactional step fighting storage conflicts.
pub const DEFAULT_CONFLICT_ATTEMPTS: u32 = 5;

/// Base backoff between conflict attempts (grows linearly).
pub const CONFLICT_BACKOFF: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

/// Errors surfaced by step execution.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The business callable failed. Carries the transient/permanent
    /// classification the runner retries on.
    #[error("step failed: {0}")]
    Step(StepFailure),

    /// Storage operation failed.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// A transactional step kept hitting storage conflicts.
    #[error("transaction conflict persisted after {attempts} attempts")]
    ConflictExhausted { attempts: u32 },
}

impl ExecutorError {
    /// The step failure, when this error is a business failure.
    pub fn step_failure(&self) -> Option<&StepFailure> {
        match self {
            ExecutorError::Step(f) => Some(f),
            _ => None,
        }
    }

    /// Whether the runner should treat this as permanent (skip retries).
    pub fn is_permanent(&self) -> bool {
        matches!(self, ExecutorError::Step(f) if f.is_permanent())
    }
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// Executes non-transactional steps through the ledger.
pub struct StepExecutor<L: LedgerRepository> {
    ledger: Arc<Ledger<L>>,
}

impl<L: LedgerRepository> StepExecutor<L> {
    pub fn new(ledger: Arc<Ledger<L>>) -> Self {
        Self { ledger }
    }

    /// Run `action` effectively-once for (`instance_id`, `step_index`).
    /// Replays return the recorded output without invoking the action.
    pub async fn run_step(
        &self,
        instance_id: &str,
        step_index: u32,
        action: &StepFn,
        ctx: StepContext,
    ) -> Result<Value, ExecutorError> {
        self.ledger
            .record_if_absent(instance_id, step_index, StepKind::Step, || action(ctx))
            .await
    }
}

// ---------------------------------------------------------------------------
// TransactionExecutor
// ---------------------------------------------------------------------------

/// Executes transactional steps: business mutation + completion record in
/// one storage transaction.
pub struct TransactionExecutor<L: LedgerRepository> {
    repo: Arc<L>,
    conflict_attempts: u32,
}

impl<L: LedgerRepository> TransactionExecutor<L> {
    pub fn new(repo: Arc<L>) -> Self {
        Self {
            repo,
            conflict_attempts: DEFAULT_CONFLICT_ATTEMPTS,
        }
    }

    /// Run `mutation` exactly-once for (`instance_id`, `step_index`).
    ///
    /// Storage busy/serialization conflicts retry the whole transaction
    /// up to the bound with a linear backoff; business failures roll the
    /// transaction back and propagate unretried.
    pub async fn run_transaction(
        &self,
        instance_id: &str,
        step_index: u32,
        mutation: &TxnFn<L::Txn>,
        ctx: StepContext,
    ) -> Result<Value, ExecutorError> {
        if let Some(record) = self.repo.find_completed(instance_id, step_index).await? {
            tracing::debug!(
                instance_id,
                step_index,
                "replaying completed transaction from ledger"
            );
            return Ok(record.output);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;

            let callable = Arc::clone(mutation);
            let step_ctx = ctx.clone();
            let boxed: TxnMutation<L::Txn> = Box::new(move |tx| callable(tx, step_ctx));

            match self
                .repo
                .transact_completion(instance_id, step_index, boxed)
                .await
            {
                Ok(TxnOutcome::Committed(record)) => return Ok(record.output),
                Ok(TxnOutcome::AlreadyCompleted(record)) => {
                    tracing::debug!(
                        instance_id,
                        step_index,
                        "transaction already completed by another writer"
                    );
                    return Ok(record.output);
                }
                Ok(TxnOutcome::MutationFailed(failure)) => {
                    return Err(ExecutorError::Step(failure));
                }
                Err(e) if e.is_retryable() => {
                    if attempt >= self.conflict_attempts {
                        tracing::warn!(
                            instance_id,
                            step_index,
                            attempts = attempt,
                            "transaction conflict retries exhausted"
                        );
                        return Err(ExecutorError::ConflictExhausted { attempts: attempt });
                    }
                    tracing::debug!(
                        instance_id,
                        step_index,
                        attempt,
                        "transaction conflict, retrying"
                    );
                    tokio::time::sleep(CONFLICT_BACKOFF * attempt).await;
                }
                Err(e) => return Err(ExecutorError::Repository(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryEngine, MemoryTxn};
    use futures_util::future::BoxFuture;
    use serde_json::json;

    fn stage_row(
        tx: &mut MemoryTxn,
        _ctx: StepContext,
    ) -> BoxFuture<'_, Result<Value, StepFailure>> {
        Box::pin(async move {
            tx.stage("stock_prices", json!({"symbol": "AAPL", "price": 187.2}));
            Ok(json!({"inserted": 1}))
        })
    }

    fn failing_mutation(
        tx: &mut MemoryTxn,
        _ctx: StepContext,
    ) -> BoxFuture<'_, Result<Value, StepFailure>> {
        Box::pin(async move {
            // Stage a row, then fail: nothing may become visible.
            tx.stage("stock_prices", json!({"symbol": "AAPL", "price": 0.0}));
            Err(StepFailure::transient("constraint violated"))
        })
    }

    fn ctx() -> StepContext {
        StepContext::new(
            "inst".to_string(),
            "prices".to_string(),
            chrono::Utc::now(),
            1,
            Value::Null,
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn test_transaction_commits_mutation_and_record_together() {
        let engine = MemoryEngine::default();
        let exec = TransactionExecutor::new(Arc::new(engine.clone()));
        let mutation: TxnFn<MemoryTxn> = Arc::new(stage_row);

        let out = exec
            .run_transaction("inst", 0, &mutation, ctx())
            .await
            .unwrap();

        assert_eq!(out, json!({"inserted": 1}));
        assert_eq!(engine.committed_rows("stock_prices").len(), 1);
        assert_eq!(engine.completed_count("inst"), 1);
    }

    #[tokio::test]
    async fn test_failed_mutation_rolls_back_both_sides() {
        let engine = MemoryEngine::default();
        let exec = TransactionExecutor::new(Arc::new(engine.clone()));
        let mutation: TxnFn<MemoryTxn> = Arc::new(failing_mutation);

        let result = exec.run_transaction("inst", 0, &mutation, ctx()).await;

        assert!(matches!(result, Err(ExecutorError::Step(_))));
        // Neither the staged row nor the ledger record is visible.
        assert!(engine.committed_rows("stock_prices").is_empty());
        assert_eq!(engine.completed_count("inst"), 0);
    }

    #[tokio::test]
    async fn test_replay_skips_mutation() {
        let engine = MemoryEngine::default();
        let exec = TransactionExecutor::new(Arc::new(engine.clone()));
        let mutation: TxnFn<MemoryTxn> = Arc::new(stage_row);

        exec.run_transaction("inst", 0, &mutation, ctx())
            .await
            .unwrap();
        exec.run_transaction("inst", 0, &mutation, ctx())
            .await
            .unwrap();

        // Second call replayed the record instead of staging another row.
        assert_eq!(engine.committed_rows("stock_prices").len(), 1);
    }
}
