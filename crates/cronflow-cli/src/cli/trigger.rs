//! `cflow trigger`: run one job immediately.

use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use cronflow_core::scheduler::{CronScheduler, SchedulerConfig};
use cronflow_types::instance::InstanceStatus;
use serde_json::Value;

use crate::state::AppState;

pub async fn trigger(state: AppState, job_id: &str, input: &str, json: bool) -> Result<()> {
    let input: Value = serde_json::from_str(input).context("invalid --input JSON")?;

    let scheduler = CronScheduler::new(
        Arc::clone(&state.registry),
        Arc::clone(&state.runner),
        Arc::clone(&state.instances),
        SchedulerConfig::default(),
    );
    let outcome = scheduler.trigger_now(job_id, input).await?;

    if json {
        let report = serde_json::json!({
            "instance_id": outcome.instance_id,
            "status": outcome.status.as_str(),
            "attempts": outcome.attempts,
            "cached": outcome.cached,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let status = match outcome.status {
        InstanceStatus::Succeeded => style(outcome.status.as_str()).green(),
        InstanceStatus::Failed => style(outcome.status.as_str()).red(),
        _ => style(outcome.status.as_str()).yellow(),
    };
    println!();
    println!(
        "  {} {} -> {} ({})",
        style("▶").bold(),
        style(job_id).cyan(),
        status,
        outcome.instance_id,
    );
    if outcome.cached {
        println!(
            "  {}",
            style("instance already terminal; replayed stored result").dim()
        );
    } else {
        println!("  attempts: {}", outcome.attempts);
    }
    println!();
    Ok(())
}
