//! `cflow steps`: show the step completion ledger for one instance.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use cronflow_core::repository::{InstanceRepository, LedgerRepository};

use crate::state::AppState;

pub async fn steps(state: AppState, instance_id: &str, json: bool) -> Result<()> {
    let instance = state.instances.get_instance(instance_id).await?;
    let records = state.ledger.list_completed(instance_id).await?;

    if json {
        let report = serde_json::json!({
            "instance": instance,
            "steps": records,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let Some(instance) = instance else {
        println!();
        println!(
            "  {} no instance with id '{}'",
            style("✗").red(),
            instance_id
        );
        println!();
        return Ok(());
    };

    println!();
    println!(
        "  {} {} ({}, {})",
        style("●").bold(),
        style(&instance.instance_id).cyan(),
        instance.workflow_name,
        instance.status,
    );
    println!();

    if records.is_empty() {
        println!("  {}", style("No completed steps yet.").dim());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Index").fg(Color::White),
        Cell::new("Kind").fg(Color::White),
        Cell::new("Completed").fg(Color::White),
        Cell::new("Output").fg(Color::White),
    ]);

    for record in &records {
        let output = serde_json::to_string(&record.output)?;
        table.add_row(vec![
            Cell::new(record.step_index),
            Cell::new(record.kind.as_str()),
            Cell::new(record.completed_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(preview(&output, 48)),
        ]);
    }

    println!("{table}");
    println!();
    Ok(())
}

fn preview(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}
