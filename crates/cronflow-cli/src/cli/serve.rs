//! `cflow serve`: run the scheduler loop until Ctrl+C or SIGTERM.

use std::sync::Arc;

use anyhow::Result;
use cronflow_core::scheduler::{CronScheduler, SchedulerConfig};

use crate::state::AppState;

pub async fn serve(
    state: AppState,
    max_concurrent: usize,
    catch_up_minutes: Option<u32>,
) -> Result<()> {
    let config = SchedulerConfig {
        max_concurrent_runs: max_concurrent,
        catch_up_window: catch_up_minutes.map(|m| chrono::Duration::minutes(i64::from(m))),
        ..SchedulerConfig::default()
    };
    let scheduler = Arc::new(CronScheduler::new(
        Arc::clone(&state.registry),
        Arc::clone(&state.runner),
        Arc::clone(&state.instances),
        config,
    ));
    let shutdown = scheduler.shutdown_token();

    println!();
    println!(
        "  {} cronflow scheduler running ({} job{})",
        console::style("⚡").bold(),
        state.registry.len(),
        if state.registry.len() == 1 { "" } else { "s" },
    );
    println!("  {}", console::style("Press Ctrl+C to stop").dim());

    let handle = tokio::spawn(scheduler.run());

    shutdown_signal().await;
    shutdown.cancel();
    handle.await??;

    println!("\n  Scheduler stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
