//! SQLite workflow instance repository.
//!
//! The `instance_id` primary key carries the exactly-once-per-tick
//! guarantee: `insert_instance` races through `ON CONFLICT DO NOTHING`
//! and reports whether this caller created the row. Status transitions
//! are guarded in SQL so a terminal row is never clobbered, whichever
//! process gets there last.

use chrono::Utc;
use cronflow_core::repository::InstanceRepository;
use cronflow_types::error::RepositoryError;
use cronflow_types::instance::{InstanceStatus, WorkflowInstance};
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, map_sqlx, parse_datetime};

/// SQLite-backed implementation of `InstanceRepository`.
pub struct SqliteInstanceRepository {
    pool: DatabasePool,
}

impl SqliteInstanceRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct InstanceRow {
    instance_id: String,
    job_id: String,
    workflow_name: String,
    status: String,
    input: String,
    scheduled_time: String,
    started_time: Option<String>,
    ended_time: Option<String>,
    error: Option<String>,
}

impl InstanceRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            instance_id: row.try_get("instance_id")?,
            job_id: row.try_get("job_id")?,
            workflow_name: row.try_get("workflow_name")?,
            status: row.try_get("status")?,
            input: row.try_get("input")?,
            scheduled_time: row.try_get("scheduled_time")?,
            started_time: row.try_get("started_time")?,
            ended_time: row.try_get("ended_time")?,
            error: row.try_get("error")?,
        })
    }

    fn into_instance(self) -> Result<WorkflowInstance, RepositoryError> {
        let status = InstanceStatus::parse(&self.status)
            .ok_or_else(|| RepositoryError::Query(format!("invalid status: {}", self.status)))?;
        let input: serde_json::Value = serde_json::from_str(&self.input)
            .map_err(|e| RepositoryError::Query(format!("invalid input JSON: {e}")))?;
        let scheduled_time = parse_datetime(&self.scheduled_time)?;
        let started_time = self.started_time.as_deref().map(parse_datetime).transpose()?;
        let ended_time = self.ended_time.as_deref().map(parse_datetime).transpose()?;

        Ok(WorkflowInstance {
            instance_id: self.instance_id,
            job_id: self.job_id,
            workflow_name: self.workflow_name,
            status,
            input,
            scheduled_time,
            started_time,
            ended_time,
            error: self.error,
        })
    }
}

// ---------------------------------------------------------------------------
// InstanceRepository implementation
// ---------------------------------------------------------------------------

impl InstanceRepository for SqliteInstanceRepository {
    async fn insert_instance(&self, instance: &WorkflowInstance) -> Result<bool, RepositoryError> {
        let input = serde_json::to_string(&instance.input)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize input: {e}")))?;

        let result = sqlx::query(
            r#"INSERT INTO workflow_instances
               (instance_id, job_id, workflow_name, status, input, scheduled_time)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (instance_id) DO NOTHING"#,
        )
        .bind(&instance.instance_id)
        .bind(&instance.job_id)
        .bind(&instance.workflow_name)
        .bind(instance.status.as_str())
        .bind(&input)
        .bind(format_datetime(&instance.scheduled_time))
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_instances WHERE instance_id = ?")
            .bind(instance_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;

        match row {
            Some(row) => {
                let instance_row = InstanceRow::from_row(&row).map_err(map_sqlx)?;
                Ok(Some(instance_row.into_instance()?))
            }
            None => Ok(None),
        }
    }

    async fn mark_running(&self, instance_id: &str) -> Result<(), RepositoryError> {
        // COALESCE keeps the original started_time when a resumed
        // instance is re-marked.
        sqlx::query(
            r#"UPDATE workflow_instances
               SET status = 'running',
                   started_time = COALESCE(started_time, ?)
               WHERE instance_id = ? AND status IN ('pending', 'running')"#,
        )
        .bind(format_datetime(&Utc::now()))
        .bind(instance_id)
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn mark_terminal(
        &self,
        instance_id: &str,
        status: InstanceStatus,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"UPDATE workflow_instances
               SET status = ?, ended_time = ?, error = ?
               WHERE instance_id = ? AND status NOT IN ('succeeded', 'failed')"#,
        )
        .bind(status.as_str())
        .bind(format_datetime(&Utc::now()))
        .bind(error)
        .bind(instance_id)
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn list_instances(
        &self,
        job_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let rows = match job_id {
            Some(job_id) => {
                sqlx::query(
                    r#"SELECT * FROM workflow_instances
                       WHERE job_id = ?
                       ORDER BY scheduled_time DESC
                       LIMIT ?"#,
                )
                .bind(job_id)
                .bind(limit)
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(
                    r#"SELECT * FROM workflow_instances
                       ORDER BY scheduled_time DESC
                       LIMIT ?"#,
                )
                .bind(limit)
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(map_sqlx)?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in &rows {
            let instance_row = InstanceRow::from_row(row).map_err(map_sqlx)?;
            instances.push(instance_row.into_instance()?);
        }
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn tick() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap()
    }

    fn instance(id: &str) -> WorkflowInstance {
        WorkflowInstance::pending(
            id.to_string(),
            "prices".to_string(),
            "record-prices".to_string(),
            json!({"symbols": ["AAPL"]}),
            tick(),
        )
    }

    #[tokio::test]
    async fn test_insert_and_get_roundtrip() {
        let repo = SqliteInstanceRepository::new(test_pool().await);

        assert!(repo.insert_instance(&instance("a")).await.unwrap());

        let got = repo.get_instance("a").await.unwrap().unwrap();
        assert_eq!(got.instance_id, "a");
        assert_eq!(got.job_id, "prices");
        assert_eq!(got.status, InstanceStatus::Pending);
        assert_eq!(got.input, json!({"symbols": ["AAPL"]}));
        assert_eq!(got.scheduled_time, tick());
        assert!(got.started_time.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_reports_loss() {
        let repo = SqliteInstanceRepository::new(test_pool().await);

        assert!(repo.insert_instance(&instance("a")).await.unwrap());
        assert!(!repo.insert_instance(&instance("a")).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_running_stamps_start_once() {
        let repo = SqliteInstanceRepository::new(test_pool().await);
        repo.insert_instance(&instance("a")).await.unwrap();

        repo.mark_running("a").await.unwrap();
        let first = repo.get_instance("a").await.unwrap().unwrap();
        assert_eq!(first.status, InstanceStatus::Running);
        let started = first.started_time.unwrap();

        repo.mark_running("a").await.unwrap();
        let second = repo.get_instance("a").await.unwrap().unwrap();
        assert_eq!(second.started_time.unwrap(), started);
    }

    #[tokio::test]
    async fn test_mark_terminal_is_final() {
        let repo = SqliteInstanceRepository::new(test_pool().await);
        repo.insert_instance(&instance("a")).await.unwrap();
        repo.mark_running("a").await.unwrap();

        repo.mark_terminal("a", InstanceStatus::Failed, Some("feed down"))
            .await
            .unwrap();
        // A late writer cannot flip a terminal status.
        repo.mark_terminal("a", InstanceStatus::Succeeded, None)
            .await
            .unwrap();
        repo.mark_running("a").await.unwrap();

        let got = repo.get_instance("a").await.unwrap().unwrap();
        assert_eq!(got.status, InstanceStatus::Failed);
        assert_eq!(got.error.as_deref(), Some("feed down"));
        assert!(got.ended_time.is_some());
    }

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let repo = SqliteInstanceRepository::new(test_pool().await);

        let mut early = instance("a");
        early.scheduled_time = tick();
        let mut late = instance("b");
        late.scheduled_time = tick() + chrono::Duration::seconds(60);
        let mut other = instance("c");
        other.job_id = "digest".to_string();

        repo.insert_instance(&early).await.unwrap();
        repo.insert_instance(&late).await.unwrap();
        repo.insert_instance(&other).await.unwrap();

        let all = repo.list_instances(None, 10).await.unwrap();
        assert_eq!(all.len(), 3);

        let prices = repo.list_instances(Some("prices"), 10).await.unwrap();
        assert_eq!(prices.len(), 2);
        // Newest first.
        assert_eq!(prices[0].instance_id, "b");
        assert_eq!(prices[1].instance_id, "a");

        let limited = repo.list_instances(Some("prices"), 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let repo = SqliteInstanceRepository::new(test_pool().await);
        assert!(repo.get_instance("nope").await.unwrap().is_none());
    }
}
