//! Read-only commands: `status`, `task` and `escalations`.

use anyhow::{Context, Result};
use cadence_core::agent::format_cost;
use cadence_core::state::{StateError, StateStore};
use cadence_types::state::TaskStatus;
use cadence_types::workflow::RunStatus;
use chrono::{DateTime, Local, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use crate::state::AppState;

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn styled_status(status: RunStatus) -> String {
    let text = status.as_str();
    match status {
        RunStatus::Completed => style(text).green().to_string(),
        RunStatus::Running | RunStatus::Pending => style(text).cyan().to_string(),
        RunStatus::Paused => style(text).yellow().to_string(),
        RunStatus::Error => style(text).red().to_string(),
    }
}

/// Show the project's current phase.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let summary = match state.engine.store().query_phase(state.project_id()).await {
        Ok(summary) => summary,
        Err(StateError::NotFound(_)) => {
            if json {
                println!("null");
            } else {
                println!();
                println!(
                    "  No runs recorded for project '{}'.",
                    style(state.project_id()).cyan()
                );
                println!();
            }
            return Ok(());
        }
        Err(e) => return Err(e).context("failed to read project state"),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} / {}",
        style("◆").bold(),
        style(&summary.project_id).cyan(),
        summary.workflow
    );
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.add_row(vec![Cell::new("Run").fg(Color::Cyan), Cell::new(summary.run_id)]);
    table.add_row(vec![
        Cell::new("Status").fg(Color::Cyan),
        Cell::new(styled_status(summary.status)),
    ]);
    table.add_row(vec![
        Cell::new("Next step").fg(Color::Cyan),
        Cell::new(summary.current_step + 1),
    ]);
    table.add_row(vec![
        Cell::new("Checkpoints").fg(Color::Cyan),
        Cell::new(summary.checkpoints),
    ]);
    if let Some(last) = &summary.last_checkpoint {
        table.add_row(vec![
            Cell::new("Last checkpoint").fg(Color::Cyan),
            Cell::new(format!(
                "#{} step {} {} at {}",
                last.sequence,
                last.step_index + 1,
                last.status,
                local_time(last.recorded_at)
            )),
        ]);
    }
    table.add_row(vec![
        Cell::new("Agent calls").fg(Color::Cyan),
        Cell::new(summary.activities),
    ]);
    table.add_row(vec![
        Cell::new("Cost").fg(Color::Cyan),
        Cell::new(format_cost(summary.total_cost_usd)),
    ]);
    table.add_row(vec![
        Cell::new("Updated").fg(Color::Cyan),
        Cell::new(local_time(summary.updated_at)),
    ]);
    println!("{table}");

    if let Some(question) = &summary.pending_question {
        println!();
        println!("  {} {}", style("?").yellow().bold(), question);
    }
    if let Some(failure) = &summary.failure {
        println!();
        println!("  {} {}", style("✗").red().bold(), failure);
    }
    println!();
    println!("  State: {}", style(state.state_root.display()).dim());
    println!();
    Ok(())
}

/// Show one agent task or workflow step.
pub async fn task(state: &AppState, id: &str, json: bool) -> Result<()> {
    let status = state
        .engine
        .store()
        .query_task_status(state.project_id(), id)
        .await
        .with_context(|| format!("task '{id}' not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    match status {
        TaskStatus::Agent {
            task_id,
            agent,
            model,
            status,
            duration_ms,
            estimated_cost_usd,
            error,
        } => {
            println!("  Task:     {}", style(task_id).dim());
            println!("  Agent:    {}", style(agent).cyan());
            println!("  Model:    {model}");
            println!("  Status:   {}", status.as_str());
            println!("  Duration: {:.1}s", duration_ms as f64 / 1000.0);
            println!("  Cost:     {}", format_cost(estimated_cost_usd));
            if let Some(error) = error {
                println!("  Error:    {}", style(error).red());
            }
        }
        TaskStatus::Step {
            step_index,
            status,
            current,
        } => {
            let status = status.map_or("not run", |s| s.as_str());
            println!("  Step:     {}", step_index + 1);
            println!("  Status:   {status}");
            if current {
                println!("  {}", style("The run is positioned at this step.").dim());
            }
        }
    }
    println!();
    Ok(())
}

/// List escalations queued for the project, newest last.
pub async fn escalations(state: &AppState, json: bool) -> Result<()> {
    let records = state
        .escalations
        .records(state.project_id())
        .await
        .context("failed to read escalation queue")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!();
        println!("  No escalations for project '{}'.", state.project_id());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Raised").fg(Color::Cyan),
            Cell::new("Run").fg(Color::Cyan),
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Question").fg(Color::Cyan),
        ]);
    for record in &records {
        let run = record.run_id.to_string();
        table.add_row(vec![
            Cell::new(local_time(record.created_at)),
            Cell::new(&run[..8.min(run.len())]),
            Cell::new(record.step_index + 1),
            Cell::new(&record.question),
        ]);
    }

    println!();
    println!("{table}");
    println!(
        "  Queue: {}",
        style(state.escalations.queue_path(state.project_id()).display()).dim()
    );
    println!();
    Ok(())
}
