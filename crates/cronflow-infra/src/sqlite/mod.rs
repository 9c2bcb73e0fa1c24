//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools. The durability guarantees of the engine
//! reduce to two uniqueness constraints here: `workflow_instances`
//! primary key for tick dedup and the (`instance_id`, `step_index`)
//! primary key on `step_records` for step dedup.

pub mod instance;
pub mod ledger;
pub mod pool;

use chrono::{DateTime, Utc};
use cronflow_types::error::RepositoryError;

/// Transaction handle passed to transactional step mutations.
pub type SqliteTxn = sqlx::Transaction<'static, sqlx::Sqlite>;

/// Map a sqlx error to the engine taxonomy. SQLite reports writer
/// contention as BUSY/LOCKED; those are retryable, everything else is a
/// plain query error.
pub(crate) fn map_sqlx(e: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db) = &e {
        let msg = db.message().to_lowercase();
        if msg.contains("busy") || msg.contains("locked") {
            return RepositoryError::Busy(db.message().to_string());
        }
    }
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepositoryError::Connection
        }
        other => RepositoryError::Query(other.to_string()),
    }
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}
