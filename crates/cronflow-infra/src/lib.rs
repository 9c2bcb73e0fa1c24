//! Infrastructure implementations for the cronflow engine.
//!
//! Implements the repository traits from `cronflow-core` with SQLite
//! persistence (WAL mode, split read/write pools).

pub mod sqlite;
