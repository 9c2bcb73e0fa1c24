//! cronflow CLI entry point.
//!
//! Binary name: `cflow`
//!
//! Parses CLI arguments, opens the database, then dispatches to the
//! appropriate command handler.

mod cli;
mod demo;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use cronflow_infra::sqlite::pool::default_database_url;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Verbosity maps to a default filter; RUST_LOG overrides it.
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info,sqlx=warn",
        1 => "debug,sqlx=warn",
        _ => "trace",
    };
    if let Err(e) = cronflow_observe::tracing_setup::init_tracing(filter) {
        eprintln!("failed to initialize tracing: {e}");
    }

    let database_url = cli.database_url.clone().unwrap_or_else(default_database_url);
    let state = AppState::init(&database_url).await?;

    match cli.command {
        Commands::Serve {
            max_concurrent,
            catch_up_minutes,
        } => {
            cli::serve::serve(state, max_concurrent, catch_up_minutes).await?;
        }

        Commands::Trigger { job_id, input } => {
            cli::trigger::trigger(state, &job_id, &input, cli.json).await?;
        }

        Commands::History { job, limit } => {
            cli::history::history(state, job.as_deref(), limit, cli.json).await?;
        }

        Commands::Steps { instance_id } => {
            cli::steps::steps(state, &instance_id, cli.json).await?;
        }

        Commands::Jobs => {
            cli::jobs::jobs(&state, cli.json)?;
        }
    }

    Ok(())
}
