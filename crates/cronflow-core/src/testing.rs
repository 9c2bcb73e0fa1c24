//! In-memory repository implementations for engine tests.
//!
//! `MemoryEngine` implements both repository traits over a single shared
//! state map, with the same visibility rules as the SQLite backend:
//! uniqueness on `instance_id` and on (`instance_id`, `step_index`), and
//! atomic apply of a transactional mutation with its completion record.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use cronflow_types::error::RepositoryError;
use cronflow_types::instance::{InstanceStatus, WorkflowInstance};
use cronflow_types::step::{StepKind, StepRecord};
use serde_json::Value;

use crate::repository::{
    InstanceRepository, LedgerRepository, LedgerWrite, TxnMutation, TxnOutcome,
};

/// Transaction handle handed to transactional step mutations in tests.
/// Rows staged here become visible only when the transaction commits.
#[derive(Debug, Default)]
pub struct MemoryTxn {
    staged: Vec<(String, Value)>,
}

impl MemoryTxn {
    /// Stage a row for `table`; applied atomically on commit.
    pub fn stage(&mut self, table: &str, row: Value) {
        self.staged.push((table.to_string(), row));
    }
}

#[derive(Debug, Default)]
struct State {
    instances: HashMap<String, WorkflowInstance>,
    records: BTreeMap<(String, u32), StepRecord>,
    rows: Vec<(String, Value)>,
}

/// Shared in-memory backend implementing both repository traits.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    state: Arc<Mutex<State>>,
}

impl MemoryEngine {
    /// Committed rows for a table, in commit order.
    pub fn committed_rows(&self, table: &str) -> Vec<Value> {
        let state = self.state.lock().unwrap();
        state
            .rows
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// Number of completion records for an instance.
    pub fn completed_count(&self, instance_id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .records
            .keys()
            .filter(|(id, _)| id == instance_id)
            .count()
    }

    /// All completion records for an instance, ordered by step index.
    pub fn records(&self, instance_id: &str) -> Vec<StepRecord> {
        let state = self.state.lock().unwrap();
        state
            .records
            .iter()
            .filter(|((id, _), _)| id == instance_id)
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Snapshot of one instance row.
    pub fn instance(&self, instance_id: &str) -> Option<WorkflowInstance> {
        self.state.lock().unwrap().instances.get(instance_id).cloned()
    }

    /// Insert a completion record directly, bypassing the engine. Used to
    /// simulate work completed by an earlier (crashed) process.
    pub fn seed_record(&self, instance_id: &str, step_index: u32, kind: StepKind, output: Value) {
        let record = StepRecord::completed(instance_id, step_index, kind, output);
        self.state
            .lock()
            .unwrap()
            .records
            .insert((instance_id.to_string(), step_index), record);
    }
}

impl InstanceRepository for MemoryEngine {
    async fn insert_instance(&self, instance: &WorkflowInstance) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        if state.instances.contains_key(&instance.instance_id) {
            return Ok(false);
        }
        state
            .instances
            .insert(instance.instance_id.clone(), instance.clone());
        Ok(true)
    }

    async fn get_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<WorkflowInstance>, RepositoryError> {
        Ok(self.state.lock().unwrap().instances.get(instance_id).cloned())
    }

    async fn mark_running(&self, instance_id: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        if let Some(instance) = state.instances.get_mut(instance_id)
            && !instance.status.is_terminal()
        {
            instance.status = InstanceStatus::Running;
            instance.started_time.get_or_insert_with(Utc::now);
        }
        Ok(())
    }

    async fn mark_terminal(
        &self,
        instance_id: &str,
        status: InstanceStatus,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        if let Some(instance) = state.instances.get_mut(instance_id)
            && !instance.status.is_terminal()
        {
            instance.status = status;
            instance.ended_time = Some(Utc::now());
            instance.error = error.map(str::to_string);
        }
        Ok(())
    }

    async fn list_instances(
        &self,
        job_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let mut out: Vec<WorkflowInstance> = state
            .instances
            .values()
            .filter(|i| job_id.is_none_or(|j| i.job_id == j))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.scheduled_time.cmp(&a.scheduled_time));
        out.truncate(limit as usize);
        Ok(out)
    }
}

impl LedgerRepository for MemoryEngine {
    type Txn = MemoryTxn;

    async fn find_completed(
        &self,
        instance_id: &str,
        step_index: u32,
    ) -> Result<Option<StepRecord>, RepositoryError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .records
            .get(&(instance_id.to_string(), step_index))
            .cloned())
    }

    async fn record_completion(&self, record: &StepRecord) -> Result<LedgerWrite, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let key = (record.instance_id.clone(), record.step_index);
        if let Some(winner) = state.records.get(&key) {
            return Ok(LedgerWrite::Lost(winner.clone()));
        }
        state.records.insert(key, record.clone());
        Ok(LedgerWrite::Recorded)
    }

    async fn list_completed(&self, instance_id: &str) -> Result<Vec<StepRecord>, RepositoryError> {
        Ok(self.records(instance_id))
    }

    async fn transact_completion(
        &self,
        instance_id: &str,
        step_index: u32,
        mutation: TxnMutation<MemoryTxn>,
    ) -> Result<TxnOutcome, RepositoryError> {
        let key = (instance_id.to_string(), step_index);
        if let Some(record) = self.state.lock().unwrap().records.get(&key) {
            return Ok(TxnOutcome::AlreadyCompleted(record.clone()));
        }

        // Run the mutation against a private handle; nothing is visible
        // until the commit below. The lock is never held across the await.
        let mut txn = MemoryTxn::default();
        let output = match mutation(&mut txn).await {
            Ok(output) => output,
            Err(failure) => return Ok(TxnOutcome::MutationFailed(failure)),
        };

        let record = StepRecord::completed(instance_id, step_index, StepKind::Transaction, output);
        let mut state = self.state.lock().unwrap();
        if let Some(winner) = state.records.get(&key) {
            // Lost the race while the mutation ran; discard staged rows.
            return Ok(TxnOutcome::AlreadyCompleted(winner.clone()));
        }
        state.rows.append(&mut txn.staged);
        state.records.insert(key, record.clone());
        Ok(TxnOutcome::Committed(record))
    }
}
