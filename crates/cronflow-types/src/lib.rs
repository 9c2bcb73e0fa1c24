//! Shared domain types for the cronflow durable workflow engine.
//!
//! This crate contains the core domain types used across the engine:
//! workflow instances, ledger step records, cron job definitions, retry
//! policy, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod error;
pub mod instance;
pub mod job;
pub mod retry;
pub mod step;
