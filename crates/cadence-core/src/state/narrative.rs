//! Human-readable `STATUS.md` rendering.

use std::fmt::Write as _;

use cadence_types::workflow::{RunStatus, WorkflowRun};

use crate::agent::format_cost;
use crate::workflow::template::value_to_string;

/// Activities listed in the narrative; older ones are counted, not shown.
const RECENT_ACTIVITY_LIMIT: usize = 10;

/// Render the narrative status document for a run.
pub fn render_status(run: &WorkflowRun) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = write_status(&mut out, run);
    out
}

fn write_status(out: &mut String, run: &WorkflowRun) -> std::fmt::Result {
    writeln!(out, "# {} / {}", run.project_id, run.workflow)?;
    writeln!(out)?;
    writeln!(out, "- **Run:** `{}`", run.id)?;
    writeln!(out, "- **Status:** {}", run.status)?;
    match run.status {
        RunStatus::Completed => writeln!(out, "- **Position:** finished")?,
        _ => writeln!(out, "- **Position:** step {}", run.current_step + 1)?,
    }
    writeln!(out, "- **Started:** {}", run.started_at.to_rfc3339())?;
    writeln!(out, "- **Updated:** {}", run.updated_at.to_rfc3339())?;
    writeln!(out, "- **Estimated cost:** {}", format_cost(run.total_cost_usd()))?;

    if let Some(escalation) = &run.escalation {
        writeln!(out)?;
        writeln!(out, "## Waiting on operator")?;
        writeln!(out)?;
        writeln!(out, "Step {}: {}", escalation.step_index + 1, escalation.question)?;
        if !escalation.reasoning.is_empty() {
            writeln!(out)?;
            writeln!(out, "> {}", escalation.reasoning)?;
        }
        writeln!(out)?;
        writeln!(out, "Escalation id: `{}`", escalation.id)?;
    }

    if let Some(failure) = &run.failure {
        writeln!(out)?;
        writeln!(out, "## Failure")?;
        writeln!(out)?;
        writeln!(
            out,
            "Step {} failed ({}, {}): {}",
            failure.step_index + 1,
            failure.error_type,
            failure.category,
            failure.message
        )?;
        match failure.last_good_checkpoint {
            Some(seq) => writeln!(out, "Last good checkpoint: #{seq}")?,
            None => writeln!(out, "No good checkpoint yet.")?,
        }
    }

    writeln!(out)?;
    writeln!(out, "## Checkpoints")?;
    writeln!(out)?;
    if run.checkpoints.is_empty() {
        writeln!(out, "None yet.")?;
    } else {
        writeln!(out, "| # | step | status | next | recorded |")?;
        writeln!(out, "|---|---|---|---|---|")?;
        for cp in &run.checkpoints {
            let next = if cp.jump {
                format!("{} (jump)", cp.next_step + 1)
            } else {
                (cp.next_step + 1).to_string()
            };
            writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                cp.sequence,
                cp.step_index + 1,
                cp.status,
                next,
                cp.recorded_at.format("%Y-%m-%d %H:%M:%S")
            )?;
        }
    }

    if !run.activities.is_empty() {
        writeln!(out)?;
        writeln!(out, "## Agent activity")?;
        writeln!(out)?;
        let skipped = run.activities.len().saturating_sub(RECENT_ACTIVITY_LIMIT);
        if skipped > 0 {
            writeln!(out, "_{skipped} earlier invocation(s) omitted._")?;
            writeln!(out)?;
        }
        for activity in run.activities.iter().skip(skipped) {
            writeln!(
                out,
                "- {} `{}` on {}: {} ({} ms, {})",
                activity.status.as_str(),
                activity.agent,
                activity.model,
                activity.task,
                activity.duration_ms,
                format_cost(activity.estimated_cost_usd)
            )?;
        }
    }

    if !run.variables.is_empty() {
        writeln!(out)?;
        writeln!(out, "## Variables")?;
        writeln!(out)?;
        for (name, value) in run.variables.iter() {
            let mut text = value_to_string(value);
            if text.chars().count() > 120 {
                text = text.chars().take(117).collect::<String>() + "...";
            }
            writeln!(out, "- `{name}`: {}", text.replace('\n', " "))?;
        }
    }

    Ok(())
}
