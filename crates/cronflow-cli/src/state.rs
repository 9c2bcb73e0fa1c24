//! Shared application state for CLI commands.
//!
//! Opens the database, wires the SQLite repositories into the engine,
//! and builds the job registry from the bundled demo workflow.

use std::sync::Arc;

use anyhow::Result;
use cronflow_core::registry::JobRegistry;
use cronflow_core::runner::WorkflowRunner;
use cronflow_infra::sqlite::SqliteTxn;
use cronflow_infra::sqlite::instance::SqliteInstanceRepository;
use cronflow_infra::sqlite::ledger::SqliteLedgerRepository;
use cronflow_infra::sqlite::pool::DatabasePool;

use crate::demo;

pub struct AppState {
    pub instances: Arc<SqliteInstanceRepository>,
    pub ledger: Arc<SqliteLedgerRepository>,
    pub registry: Arc<JobRegistry<SqliteTxn>>,
    pub runner: Arc<WorkflowRunner<SqliteLedgerRepository, SqliteInstanceRepository>>,
}

impl AppState {
    pub async fn init(database_url: &str) -> Result<Self> {
        let pool = DatabasePool::new(database_url).await?;
        let instances = Arc::new(SqliteInstanceRepository::new(pool.clone()));
        let ledger = Arc::new(SqliteLedgerRepository::new(pool.clone()));
        let registry = Arc::new(demo::registry()?);
        let runner = Arc::new(WorkflowRunner::new(
            Arc::clone(&ledger),
            Arc::clone(&instances),
        ));

        Ok(Self {
            instances,
            ledger,
            registry,
            runner,
        })
    }
}
