//! `cflow jobs`: list registered cron jobs.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};

use crate::state::AppState;

pub fn jobs(state: &AppState, json: bool) -> Result<()> {
    if json {
        let report: Vec<_> = state
            .registry
            .jobs()
            .map(|job| {
                serde_json::json!({
                    "job_id": job.definition.job_id,
                    "schedule": job.definition.cron_expression,
                    "workflow": job.definition.workflow_name,
                    "steps": job.workflow.steps.len(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Job").fg(Color::White),
        Cell::new("Schedule").fg(Color::White),
        Cell::new("Workflow").fg(Color::White),
        Cell::new("Steps").fg(Color::White),
    ]);

    for job in state.registry.jobs() {
        table.add_row(vec![
            Cell::new(&job.definition.job_id),
            Cell::new(&job.definition.cron_expression),
            Cell::new(&job.definition.workflow_name),
            Cell::new(job.workflow.steps.len()),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}
