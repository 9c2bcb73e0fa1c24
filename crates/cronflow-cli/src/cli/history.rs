//! `cflow history`: list workflow instances.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use cronflow_core::repository::InstanceRepository;
use cronflow_types::instance::{InstanceStatus, WorkflowInstance};

use crate::state::AppState;

pub async fn history(state: AppState, job: Option<&str>, limit: u32, json: bool) -> Result<()> {
    let instances = state.instances.list_instances(job, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&instances)?);
        return Ok(());
    }

    if instances.is_empty() {
        println!();
        println!("  {}", style("No workflow instances yet.").dim());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Instance").fg(Color::White),
        Cell::new("Job").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Scheduled").fg(Color::White),
        Cell::new("Ended").fg(Color::White),
        Cell::new("Error").fg(Color::White),
    ]);

    for instance in &instances {
        table.add_row(vec![
            Cell::new(&instance.instance_id[..12.min(instance.instance_id.len())]),
            Cell::new(&instance.job_id),
            status_cell(instance),
            Cell::new(instance.scheduled_time.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(
                instance
                    .ended_time
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_default(),
            ),
            Cell::new(truncate(instance.error.as_deref().unwrap_or(""), 40)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn status_cell(instance: &WorkflowInstance) -> Cell {
    let cell = Cell::new(instance.status.as_str());
    match instance.status {
        InstanceStatus::Succeeded => cell.fg(Color::Green),
        InstanceStatus::Failed => cell.fg(Color::Red),
        InstanceStatus::Running => cell.fg(Color::Yellow),
        InstanceStatus::Pending => cell.fg(Color::Grey),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}
