//! Read-only projections of a run: phase summary and task status.

use cadence_types::state::{CheckpointSummary, PhaseSummary, TaskStatus};
use cadence_types::workflow::WorkflowRun;
use uuid::Uuid;

/// Summarise where a run stands.
pub fn phase_summary(run: &WorkflowRun) -> PhaseSummary {
    PhaseSummary {
        project_id: run.project_id.clone(),
        run_id: run.id,
        workflow: run.workflow.clone(),
        status: run.status,
        current_step: run.current_step,
        checkpoints: run.checkpoints.len(),
        last_checkpoint: run.latest_checkpoint().map(|cp| CheckpointSummary {
            sequence: cp.sequence,
            step_index: cp.step_index,
            status: cp.status,
            recorded_at: cp.recorded_at,
        }),
        activities: run.activities.len(),
        total_cost_usd: run.total_cost_usd(),
        pending_question: run.escalation.as_ref().map(|e| e.question.clone()),
        failure: run.failure.as_ref().map(|f| {
            format!("step {} ({}): {}", f.step_index + 1, f.error_type, f.message)
        }),
        updated_at: run.updated_at,
    }
}

/// Look up a task by agent task UUID or 1-based step number.
///
/// Returns `None` when the id matches neither.
pub fn task_status(run: &WorkflowRun, task_id: &str) -> Option<TaskStatus> {
    let task_id = task_id.trim();

    if let Ok(id) = Uuid::parse_str(task_id) {
        return run
            .activities
            .iter()
            .rev()
            .find(|a| a.task_id == id)
            .map(|a| TaskStatus::Agent {
                task_id: a.task_id,
                agent: a.agent.clone(),
                model: a.model.clone(),
                status: a.status,
                duration_ms: a.duration_ms,
                estimated_cost_usd: a.estimated_cost_usd,
                error: a.error.clone(),
            });
    }

    let number: usize = task_id.parse().ok()?;
    if number == 0 {
        return None;
    }
    let step_index = number - 1;
    let status = run
        .checkpoints
        .iter()
        .rev()
        .find(|cp| cp.step_index == step_index)
        .map(|cp| cp.status);

    // Steps beyond anything the run has touched or points at are unknown.
    let highest_known = run
        .checkpoints
        .iter()
        .map(|cp| cp.step_index.max(cp.next_step))
        .max()
        .unwrap_or(0)
        .max(run.current_step);
    if status.is_none() && step_index > highest_known {
        return None;
    }

    Some(TaskStatus::Step {
        step_index,
        status,
        current: run.current_step == step_index && !run.status.is_terminal(),
    })
}
