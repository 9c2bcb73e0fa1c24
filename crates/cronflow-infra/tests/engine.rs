//! End-to-end engine tests against real SQLite storage.
//!
//! These drive the workflow runner through the SQLite repositories the
//! same way the scheduler does, covering the durability guarantees that
//! the in-memory unit tests can only approximate.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{TimeZone, Utc};
use cronflow_core::repository::{InstanceRepository, LedgerRepository};
use cronflow_core::runner::WorkflowRunner;
use cronflow_core::step::{StepContext, WorkflowBuilder, WorkflowDefinition};
use cronflow_infra::sqlite::SqliteTxn;
use cronflow_infra::sqlite::instance::SqliteInstanceRepository;
use cronflow_infra::sqlite::ledger::SqliteLedgerRepository;
use cronflow_infra::sqlite::pool::DatabasePool;
use cronflow_types::error::StepFailure;
use cronflow_types::instance::{InstanceStatus, WorkflowInstance};
use cronflow_types::retry::RetryPolicy;
use cronflow_types::step::{StepKind, StepRecord};
use futures_util::future::BoxFuture;
use serde_json::{Value, json};

async fn test_pool() -> DatabasePool {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("engine.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    std::mem::forget(dir);
    DatabasePool::new(&url).await.unwrap()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 2,
    }
}

fn persist_quote(tx: &mut SqliteTxn, ctx: StepContext) -> BoxFuture<'_, Result<Value, StepFailure>> {
    Box::pin(async move {
        let quotes = ctx
            .output(0)
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| StepFailure::permanent("missing fetch output"))?;
        for (symbol, price) in &quotes {
            sqlx::query(
                "INSERT INTO stock_prices (stock_symbol, stock_price, recorded_at) VALUES (?, ?, ?)",
            )
            .bind(symbol)
            .bind(price.as_f64().unwrap_or_default())
            .bind(ctx.scheduled_time.to_rfc3339())
            .execute(&mut **tx)
            .await
            .map_err(StepFailure::transient)?;
        }
        Ok(json!({ "inserted": quotes.len() }))
    })
}

fn prices_workflow(
    fetch_calls: Arc<AtomicU32>,
    fail_first_n: u32,
) -> WorkflowDefinition<SqliteTxn> {
    WorkflowBuilder::new("record-prices")
        .retry(fast_retry())
        .step("fetch", move |_ctx| {
            let calls = Arc::clone(&fetch_calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= fail_first_n {
                    Err(StepFailure::transient("feed timeout"))
                } else {
                    Ok(json!({ "AAPL": 187.2, "MSFT": 404.1 }))
                }
            }
        })
        .transaction("persist", persist_quote)
        .step("notify", |_ctx| async { Ok(json!({ "notified": true })) })
        .build()
}

async fn seed_instance(instances: &SqliteInstanceRepository, instance_id: &str) {
    let instance = WorkflowInstance::pending(
        instance_id.to_string(),
        "prices".to_string(),
        "record-prices".to_string(),
        Value::Null,
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap(),
    );
    assert!(instances.insert_instance(&instance).await.unwrap());
}

async fn price_rows(pool: &DatabasePool) -> i64 {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stock_prices")
        .fetch_one(&pool.reader)
        .await
        .unwrap();
    row.0
}

#[tokio::test]
async fn test_transient_failure_retries_then_succeeds_durably() {
    let pool = test_pool().await;
    let instances = Arc::new(SqliteInstanceRepository::new(pool.clone()));
    let ledger = Arc::new(SqliteLedgerRepository::new(pool.clone()));
    let runner = WorkflowRunner::new(Arc::clone(&ledger), Arc::clone(&instances));

    let fetch_calls = Arc::new(AtomicU32::new(0));
    let workflow = prices_workflow(Arc::clone(&fetch_calls), 2);
    seed_instance(&instances, "inst").await;

    let outcome = runner.execute("inst", &workflow).await.unwrap();

    assert_eq!(outcome.status, InstanceStatus::Succeeded);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(fetch_calls.load(Ordering::SeqCst), 3);
    // One record per step, two price rows, exactly once.
    assert_eq!(ledger.list_completed("inst").await.unwrap().len(), 3);
    assert_eq!(price_rows(&pool).await, 2);

    // Replay: nothing runs again, nothing is written again.
    let replay = runner.execute("inst", &workflow).await.unwrap();
    assert!(replay.cached);
    assert_eq!(fetch_calls.load(Ordering::SeqCst), 3);
    assert_eq!(price_rows(&pool).await, 2);
}

#[tokio::test]
async fn test_resume_skips_steps_completed_before_crash() {
    let pool = test_pool().await;
    let instances = Arc::new(SqliteInstanceRepository::new(pool.clone()));
    let ledger = Arc::new(SqliteLedgerRepository::new(pool.clone()));
    let runner = WorkflowRunner::new(Arc::clone(&ledger), Arc::clone(&instances));

    let fetch_calls = Arc::new(AtomicU32::new(0));
    let workflow = prices_workflow(Arc::clone(&fetch_calls), 0);
    seed_instance(&instances, "inst").await;

    // Simulate a crash after the fetch step completed: instance stuck
    // Running, ledger holds the fetch record.
    instances.mark_running("inst").await.unwrap();
    let record = StepRecord::completed(
        "inst",
        0,
        StepKind::Step,
        json!({ "AAPL": 190.0 }),
    );
    ledger.record_completion(&record).await.unwrap();

    let outcome = runner.execute("inst", &workflow).await.unwrap();

    assert_eq!(outcome.status, InstanceStatus::Succeeded);
    // The fetch callable never ran; persist saw the recorded output.
    assert_eq!(fetch_calls.load(Ordering::SeqCst), 0);
    assert_eq!(price_rows(&pool).await, 1);
    let price: (f64,) = sqlx::query_as("SELECT stock_price FROM stock_prices LIMIT 1")
        .fetch_one(&pool.reader)
        .await
        .unwrap();
    assert_eq!(price.0, 190.0);
}

#[tokio::test]
async fn test_permanent_failure_marks_instance_failed() {
    let pool = test_pool().await;
    let instances = Arc::new(SqliteInstanceRepository::new(pool.clone()));
    let ledger = Arc::new(SqliteLedgerRepository::new(pool.clone()));
    let runner = WorkflowRunner::new(Arc::clone(&ledger), Arc::clone(&instances));

    let workflow: WorkflowDefinition<SqliteTxn> = WorkflowBuilder::new("rejected")
        .retry(fast_retry())
        .step("validate", |_ctx| async {
            Err(StepFailure::permanent("unknown symbol"))
        })
        .build();
    seed_instance(&instances, "inst").await;

    let outcome = runner.execute("inst", &workflow).await.unwrap();

    assert_eq!(outcome.status, InstanceStatus::Failed);
    assert_eq!(outcome.attempts, 1);

    let failed = instances.get_instance("inst").await.unwrap().unwrap();
    assert_eq!(failed.status, InstanceStatus::Failed);
    assert!(failed.error.unwrap().contains("unknown symbol"));
    assert!(ledger.list_completed("inst").await.unwrap().is_empty());
}
