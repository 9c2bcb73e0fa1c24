//! Observability setup for cronflow binaries.

pub mod tracing_setup;
