//! Engine repository trait definitions.
//!
//! Defines the storage interface for workflow instances and the
//! idempotency ledger. The infrastructure layer (cronflow-infra)
//! implements these traits with SQLite persistence.
//!
//! All cross-process coordination goes through these traits: tick dedup
//! is a uniqueness constraint on `instance_id`, step dedup is a
//! uniqueness constraint on (`instance_id`, `step_index`). The engine
//! never takes in-memory locks across processes.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use cronflow_types::error::{RepositoryError, StepFailure};
use cronflow_types::instance::{InstanceStatus, WorkflowInstance};
use cronflow_types::step::StepRecord;
use futures_util::future::BoxFuture;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Write outcomes
// ---------------------------------------------------------------------------

/// Outcome of a ledger completion write.
#[derive(Debug)]
pub enum LedgerWrite {
    /// This writer's record was committed.
    Recorded,
    /// Another writer completed the step first; their record stands and
    /// is returned so the caller can use the winning output.
    Lost(StepRecord),
}

/// Outcome of a transactional completion.
#[derive(Debug)]
pub enum TxnOutcome {
    /// The business mutation and the completion record committed together.
    Committed(StepRecord),
    /// The step was already completed (replay or lost race); nothing was
    /// mutated.
    AlreadyCompleted(StepRecord),
    /// The mutation callback failed; the whole transaction rolled back.
    MutationFailed(StepFailure),
}

/// Business mutation run inside a ledger transaction.
///
/// Receives a mutable handle to the open transaction and resolves to the
/// step output that will be recorded alongside the mutation.
pub type TxnMutation<T> =
    Box<dyn for<'t> FnOnce(&'t mut T) -> BoxFuture<'t, Result<Value, StepFailure>> + Send>;

// ---------------------------------------------------------------------------
// InstanceRepository
// ---------------------------------------------------------------------------

/// Repository trait for workflow instance rows.
pub trait InstanceRepository: Send + Sync {
    /// Insert a new instance. Returns `false` when an instance with the
    /// same `instance_id` already exists -- the expected duplicate-tick
    /// path, not an error.
    fn insert_instance(
        &self,
        instance: &WorkflowInstance,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Get an instance by id.
    fn get_instance(
        &self,
        instance_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowInstance>, RepositoryError>> + Send;

    /// Transition `Pending -> Running`, stamping `started_time` on first
    /// call. Idempotent: re-marking a running instance is a no-op, and a
    /// terminal instance is never clobbered.
    fn mark_running(
        &self,
        instance_id: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Transition to a terminal status, stamping `ended_time`. A no-op if
    /// the instance is already terminal.
    fn mark_terminal(
        &self,
        instance_id: &str,
        status: InstanceStatus,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List instances, optionally filtered by job, newest first.
    fn list_instances(
        &self,
        job_id: Option<&str>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;
}

// ---------------------------------------------------------------------------
// LedgerRepository
// ---------------------------------------------------------------------------

/// Repository trait for the idempotency ledger.
///
/// `Txn` is the backend transaction handle passed to transactional step
/// mutations (for SQLite this is `sqlx::Transaction<'static, Sqlite>`).
pub trait LedgerRepository: Send + Sync {
    type Txn: Send + 'static;

    /// Find the completion record for one (instance, step) pair, if any.
    fn find_completed(
        &self,
        instance_id: &str,
        step_index: u32,
    ) -> impl std::future::Future<Output = Result<Option<StepRecord>, RepositoryError>> + Send;

    /// Write a completion record, reporting a unique-constraint conflict
    /// as `LedgerWrite::Lost` rather than an error.
    fn record_completion(
        &self,
        record: &StepRecord,
    ) -> impl std::future::Future<Output = Result<LedgerWrite, RepositoryError>> + Send;

    /// List all completion records for an instance, ordered by step index.
    fn list_completed(
        &self,
        instance_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<StepRecord>, RepositoryError>> + Send;

    /// Run `mutation` and the completion record insert for
    /// (`instance_id`, `step_index`) inside one atomic transaction:
    /// either both persist or neither does. The record is written with
    /// kind `Transaction`.
    fn transact_completion(
        &self,
        instance_id: &str,
        step_index: u32,
        mutation: TxnMutation<Self::Txn>,
    ) -> impl std::future::Future<Output = Result<TxnOutcome, RepositoryError>> + Send;
}
