//! SQLite idempotency ledger.
//!
//! The (`instance_id`, `step_index`) primary key on `step_records` is the
//! step-level exactly-once guarantee. `record_completion` races through
//! `ON CONFLICT DO NOTHING` and reports a lost race with the winning
//! record. `transact_completion` runs the business mutation and the
//! record insert on the single writer connection inside one transaction,
//! so partial state is impossible: a crash at any point leaves either
//! both or neither.

use cronflow_core::repository::{LedgerRepository, LedgerWrite, TxnMutation, TxnOutcome};
use cronflow_types::error::RepositoryError;
use cronflow_types::step::{StepKind, StepRecord};
use sqlx::Row;

use super::pool::DatabasePool;
use super::{SqliteTxn, format_datetime, map_sqlx, parse_datetime};

/// SQLite-backed implementation of `LedgerRepository`.
pub struct SqliteLedgerRepository {
    pool: DatabasePool,
}

impl SqliteLedgerRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn fetch_record(
        &self,
        instance_id: &str,
        step_index: u32,
    ) -> Result<Option<StepRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM step_records WHERE instance_id = ? AND step_index = ?",
        )
        .bind(instance_id)
        .bind(step_index as i64)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        match row {
            Some(row) => {
                let record_row = RecordRow::from_row(&row).map_err(map_sqlx)?;
                Ok(Some(record_row.into_record()?))
            }
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct RecordRow {
    instance_id: String,
    step_index: i64,
    kind: String,
    output: String,
    completed_at: String,
}

impl RecordRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            instance_id: row.try_get("instance_id")?,
            step_index: row.try_get("step_index")?,
            kind: row.try_get("kind")?,
            output: row.try_get("output")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_record(self) -> Result<StepRecord, RepositoryError> {
        let kind = StepKind::parse(&self.kind)
            .ok_or_else(|| RepositoryError::Query(format!("invalid step kind: {}", self.kind)))?;
        let output: serde_json::Value = serde_json::from_str(&self.output)
            .map_err(|e| RepositoryError::Query(format!("invalid output JSON: {e}")))?;

        Ok(StepRecord {
            instance_id: self.instance_id,
            step_index: self.step_index as u32,
            kind,
            output,
            completed_at: parse_datetime(&self.completed_at)?,
        })
    }
}

fn insert_record_query(record: &StepRecord) -> Result<sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>>, RepositoryError> {
    let output = serde_json::to_string(&record.output)
        .map_err(|e| RepositoryError::Query(format!("failed to serialize output: {e}")))?;

    Ok(sqlx::query(
        r#"INSERT INTO step_records (instance_id, step_index, kind, output, completed_at)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT (instance_id, step_index) DO NOTHING"#,
    )
    .bind(&record.instance_id)
    .bind(record.step_index as i64)
    .bind(record.kind.as_str())
    .bind(output)
    .bind(format_datetime(&record.completed_at)))
}

// ---------------------------------------------------------------------------
// LedgerRepository implementation
// ---------------------------------------------------------------------------

impl LedgerRepository for SqliteLedgerRepository {
    type Txn = SqliteTxn;

    async fn find_completed(
        &self,
        instance_id: &str,
        step_index: u32,
    ) -> Result<Option<StepRecord>, RepositoryError> {
        self.fetch_record(instance_id, step_index).await
    }

    async fn record_completion(&self, record: &StepRecord) -> Result<LedgerWrite, RepositoryError> {
        let result = insert_record_query(record)?
            .execute(&self.pool.writer)
            .await
            .map_err(map_sqlx)?;

        if result.rows_affected() > 0 {
            return Ok(LedgerWrite::Recorded);
        }

        // Conflict: another writer completed this step first.
        let winner = self
            .fetch_record(&record.instance_id, record.step_index)
            .await?
            .ok_or_else(|| {
                RepositoryError::Query("completion record vanished after conflict".to_string())
            })?;
        Ok(LedgerWrite::Lost(winner))
    }

    async fn list_completed(&self, instance_id: &str) -> Result<Vec<StepRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM step_records WHERE instance_id = ? ORDER BY step_index",
        )
        .bind(instance_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let record_row = RecordRow::from_row(row).map_err(map_sqlx)?;
            records.push(record_row.into_record()?);
        }
        Ok(records)
    }

    async fn transact_completion(
        &self,
        instance_id: &str,
        step_index: u32,
        mutation: TxnMutation<SqliteTxn>,
    ) -> Result<TxnOutcome, RepositoryError> {
        if let Some(record) = self.fetch_record(instance_id, step_index).await? {
            return Ok(TxnOutcome::AlreadyCompleted(record));
        }

        let mut tx = self.pool.writer.begin().await.map_err(map_sqlx)?;

        let output = match mutation(&mut tx).await {
            Ok(output) => output,
            Err(failure) => {
                tx.rollback().await.map_err(map_sqlx)?;
                return Ok(TxnOutcome::MutationFailed(failure));
            }
        };

        let record = StepRecord::completed(instance_id, step_index, StepKind::Transaction, output);
        let result = insert_record_query(&record)?
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            // Another process finished this step while our mutation ran.
            // Roll the mutation back and adopt the winning record.
            tx.rollback().await.map_err(map_sqlx)?;
            let winner = self.fetch_record(instance_id, step_index).await?.ok_or_else(|| {
                RepositoryError::Query("completion record vanished after conflict".to_string())
            })?;
            return Ok(TxnOutcome::AlreadyCompleted(winner));
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(TxnOutcome::Committed(record))
    }
}
