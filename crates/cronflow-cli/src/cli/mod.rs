//! CLI command definitions and dispatch for the `cflow` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod history;
pub mod jobs;
pub mod serve;
pub mod steps;
pub mod trigger;

use clap::{Parser, Subcommand};

/// Durable cron-triggered workflow engine.
#[derive(Parser)]
#[command(name = "cflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// SQLite database URL.
    #[arg(long, global = true, env = "CRONFLOW_DATABASE_URL")]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the cron scheduler until interrupted.
    Serve {
        /// Maximum concurrently executing workflow instances.
        #[arg(long, default_value_t = 8)]
        max_concurrent: usize,

        /// On startup, dispatch ticks missed in the last N minutes.
        #[arg(long)]
        catch_up_minutes: Option<u32>,
    },

    /// Trigger a job now, outside its cron schedule.
    Trigger {
        /// Job id to trigger.
        job_id: String,

        /// JSON input payload for the workflow.
        #[arg(long, default_value = "null")]
        input: String,
    },

    /// List workflow instances, newest first.
    #[command(alias = "ls")]
    History {
        /// Only show instances of this job.
        #[arg(long)]
        job: Option<String>,

        /// Maximum number of instances to show.
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Show the step completion ledger for one instance.
    Steps {
        /// Instance id (as printed by `cflow history`).
        instance_id: String,
    },

    /// List registered cron jobs.
    Jobs,
}
