//! Idempotency ledger: replay-skipping completion records.
//!
//! `record_if_absent` is the single primitive both executors build on.
//! A completed (instance, step) pair returns its stored output without
//! re-invoking the computation; an incomplete one runs the computation
//! and writes the record. Racing writers are resolved by the storage
//! uniqueness constraint -- the loser adopts the winner's output, so the
//! race is never visible to callers.

use std::sync::Arc;

use cronflow_types::error::StepFailure;
use cronflow_types::step::{StepKind, StepRecord};
use serde_json::Value;

use crate::executor::ExecutorError;
use crate::repository::{LedgerRepository, LedgerWrite};

/// Ledger facade over a `LedgerRepository`.
pub struct Ledger<L: LedgerRepository> {
    repo: Arc<L>,
}

impl<L: LedgerRepository> Ledger<L> {
    pub fn new(repo: Arc<L>) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &Arc<L> {
        &self.repo
    }

    /// Return the stored output for (`instance_id`, `step_index`) if the
    /// step already completed; otherwise run `compute` and record its
    /// result.
    ///
    /// If `compute` fails, no record is written and the failure
    /// propagates -- the runner owns retry decisions.
    pub async fn record_if_absent<F, Fut>(
        &self,
        instance_id: &str,
        step_index: u32,
        kind: StepKind,
        compute: F,
    ) -> Result<Value, ExecutorError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value, StepFailure>>,
    {
        if let Some(record) = self.repo.find_completed(instance_id, step_index).await? {
            tracing::debug!(
                instance_id,
                step_index,
                "replaying completed step from ledger"
            );
            return Ok(record.output);
        }

        let output = compute().await.map_err(ExecutorError::Step)?;

        let record = StepRecord::completed(instance_id, step_index, kind, output);
        match self.repo.record_completion(&record).await? {
            LedgerWrite::Recorded => Ok(record.output),
            LedgerWrite::Lost(winner) => {
                // Another process completed the step between our read and
                // our write. Its record is the durable truth.
                tracing::debug!(
                    instance_id,
                    step_index,
                    "lost ledger write race, adopting winning record"
                );
                Ok(winner.output)
            }
        }
    }
}
