//! Durable workflow engine core.
//!
//! This crate defines the "ports" (repository traits) that the
//! infrastructure layer implements, plus the engine logic itself:
//! - `repository` -- storage traits for instances and the idempotency ledger
//! - `instance_id` -- deterministic instance-id derivation (versioned contract)
//! - `ledger` -- replay-skipping completion ledger (`record_if_absent`)
//! - `step` -- workflow definitions: typed step descriptors and the builder
//! - `executor` -- step and transactional-step executors
//! - `runner` -- ordered step execution with retry budget and crash resume
//! - `registry` -- immutable process-lifetime cron job registry
//! - `scheduler` -- tick evaluation loop with storage-level dedup
//!
//! Depends only on `cronflow-types` -- never on a database or IO crate.

pub mod executor;
pub mod instance_id;
pub mod ledger;
pub mod registry;
pub mod repository;
pub mod runner;
pub mod scheduler;
pub mod step;

#[cfg(test)]
pub(crate) mod testing;
