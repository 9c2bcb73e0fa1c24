//! Workflow definitions: typed step descriptors and the builder.
//!
//! A workflow is an ordered list of step descriptors built explicitly
//! through `WorkflowBuilder` -- no runtime annotation scanning. The step
//! index is the declaration position, fixed at authoring time, and is the
//! key the ledger dedups on; reordering declarations is a breaking change
//! for in-flight instances.
//!
//! Definitions are generic over `T`, the backend transaction handle that
//! transactional steps receive (`SqliteTxn` in production, an in-memory
//! handle in tests).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cronflow_types::error::StepFailure;
use cronflow_types::retry::RetryPolicy;
use cronflow_types::step::StepKind;
use futures_util::future::BoxFuture;
use serde_json::Value;

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// Per-step execution context handed to every callable.
///
/// Outputs of earlier steps are available by index; on resume they are
/// rehydrated from the ledger, so a callable sees the same context on a
/// replayed attempt as it did on the first.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub instance_id: String,
    pub job_id: String,
    /// The cron tick this instance was created for (not the invocation time).
    pub scheduled_time: DateTime<Utc>,
    /// 1-based workflow attempt number.
    pub attempt: u32,
    /// Workflow input payload.
    pub input: Value,
    outputs: Vec<Value>,
}

impl StepContext {
    pub(crate) fn new(
        instance_id: String,
        job_id: String,
        scheduled_time: DateTime<Utc>,
        attempt: u32,
        input: Value,
        outputs: Vec<Value>,
    ) -> Self {
        Self {
            instance_id,
            job_id,
            scheduled_time,
            attempt,
            input,
            outputs,
        }
    }

    /// Output of an earlier step by index. Only steps with a lower index
    /// than the current one are visible.
    pub fn output(&self, step_index: u32) -> Option<&Value> {
        self.outputs.get(step_index as usize)
    }
}

// ---------------------------------------------------------------------------
// Step callables
// ---------------------------------------------------------------------------

/// Non-transactional step callable (e.g. a network call).
pub type StepFn =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<Value, StepFailure>> + Send + Sync>;

/// Transactional step callable. Receives a handle to the open storage
/// transaction; its writes commit atomically with the ledger record.
pub type TxnFn<T> = Arc<
    dyn for<'t> Fn(&'t mut T, StepContext) -> BoxFuture<'t, Result<Value, StepFailure>>
        + Send
        + Sync,
>;

/// The action behind one step position.
pub enum StepAction<T> {
    Step(StepFn),
    Transaction(TxnFn<T>),
}

impl<T> StepAction<T> {
    pub fn kind(&self) -> StepKind {
        match self {
            StepAction::Step(_) => StepKind::Step,
            StepAction::Transaction(_) => StepKind::Transaction,
        }
    }
}

impl<T> Clone for StepAction<T> {
    fn clone(&self) -> Self {
        match self {
            StepAction::Step(f) => StepAction::Step(Arc::clone(f)),
            StepAction::Transaction(f) => StepAction::Transaction(Arc::clone(f)),
        }
    }
}

/// One declared step: a name (for logs and tables) plus its action.
pub struct StepDescriptor<T> {
    pub name: String,
    pub action: StepAction<T>,
}

impl<T> Clone for StepDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            action: self.action.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// An ordered sequence of steps executed as one logical unit.
pub struct WorkflowDefinition<T> {
    pub name: String,
    pub steps: Vec<StepDescriptor<T>>,
    pub retry: RetryPolicy,
}

impl<T> Clone for WorkflowDefinition<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            steps: self.steps.clone(),
            retry: self.retry,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowBuilder
// ---------------------------------------------------------------------------

/// Builder for workflow definitions.
///
/// ```ignore
/// let workflow = WorkflowBuilder::new("record-prices")
///     .retry(RetryPolicy::default())
///     .step("fetch", |ctx| async move { fetch_quotes(ctx).await })
///     .transaction("persist", persist_quotes)
///     .step("notify", |ctx| async move { notify(ctx).await })
///     .build();
/// ```
///
/// Transaction callables are written as named functions returning a
/// `BoxFuture` borrowing the transaction handle:
///
/// ```ignore
/// fn persist_quotes(
///     tx: &mut SqliteTxn,
///     ctx: StepContext,
/// ) -> BoxFuture<'_, Result<Value, StepFailure>> {
///     Box::pin(async move { /* sqlx queries on tx */ })
/// }
/// ```
pub struct WorkflowBuilder<T> {
    name: String,
    steps: Vec<StepDescriptor<T>>,
    retry: RetryPolicy,
}

impl<T> WorkflowBuilder<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Set the workflow-level retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Append a non-transactional step.
    pub fn step<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, StepFailure>> + Send + 'static,
    {
        let callable: StepFn = Arc::new(move |ctx| Box::pin(f(ctx)));
        self.steps.push(StepDescriptor {
            name: name.into(),
            action: StepAction::Step(callable),
        });
        self
    }

    /// Append a transactional step.
    pub fn transaction<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: for<'t> Fn(&'t mut T, StepContext) -> BoxFuture<'t, Result<Value, StepFailure>>
            + Send
            + Sync
            + 'static,
    {
        self.steps.push(StepDescriptor {
            name: name.into(),
            action: StepAction::Transaction(Arc::new(f)),
        });
        self
    }

    pub fn build(self) -> WorkflowDefinition<T> {
        WorkflowDefinition {
            name: self.name,
            steps: self.steps,
            retry: self.retry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_txn(
        _tx: &mut (),
        ctx: StepContext,
    ) -> BoxFuture<'_, Result<Value, StepFailure>> {
        Box::pin(async move { Ok(ctx.input) })
    }

    #[test]
    fn test_builder_assigns_indices_by_declaration_order() {
        let wf: WorkflowDefinition<()> = WorkflowBuilder::new("wf")
            .step("first", |_ctx| async { Ok(json!(1)) })
            .transaction("second", echo_txn)
            .step("third", |_ctx| async { Ok(json!(3)) })
            .build();

        assert_eq!(wf.steps.len(), 3);
        assert_eq!(wf.steps[0].name, "first");
        assert_eq!(wf.steps[0].action.kind(), StepKind::Step);
        assert_eq!(wf.steps[1].action.kind(), StepKind::Transaction);
        assert_eq!(wf.steps[2].name, "third");
    }

    #[test]
    fn test_context_exposes_prior_outputs_only() {
        let ctx = StepContext::new(
            "inst".to_string(),
            "job".to_string(),
            Utc::now(),
            1,
            Value::Null,
            vec![json!("a"), json!("b")],
        );
        assert_eq!(ctx.output(0), Some(&json!("a")));
        assert_eq!(ctx.output(1), Some(&json!("b")));
        assert_eq!(ctx.output(2), None);
    }
}
