//! `cadence run` and `cadence resume`.

use std::future::Future;
use std::path::Path;

use anyhow::{Context, Result};
use cadence_core::agent::format_cost;
use cadence_core::state::{StateError, StateStore};
use cadence_core::workflow::{EngineError, LoadedWorkflow, load_any};
use cadence_infra::config::check_agent_assignments;
use cadence_types::escalation::{EscalationDecision, EscalationResponse};
use cadence_types::event::KernelEvent;
use cadence_types::workflow::{RunStatus, WorkflowRun};
use console::style;
use uuid::Uuid;

use crate::state::AppState;

use super::parse_vars;

fn load_definition(path: &Path) -> Result<LoadedWorkflow> {
    load_any(path).with_context(|| format!("failed to load workflow '{}'", path.display()))
}

/// Start a new run and drive it until it completes, pauses or errors.
pub async fn run(state: &AppState, definition: &Path, vars: &[String], json: bool) -> Result<()> {
    let workflow = load_definition(definition)?;
    check_agent_assignments(&state.config, &workflow)
        .with_context(|| format!("workflow '{}' cannot run", workflow.name()))?;

    let overrides = parse_vars(vars)?;
    let mut run = WorkflowRun::new(
        state.project_id(),
        workflow.name(),
        workflow.initial_variables(overrides),
    );

    if !json {
        println!();
        println!(
            "  {} Running '{}' ({} steps)",
            style("▶").green().bold(),
            style(workflow.name()).cyan(),
            workflow.step_count()
        );
        println!("  Run: {}", style(run.id).dim());
        println!();
    }

    let run_id = run.id;
    drive(state, run_id, state.engine.execute(&workflow, &mut run), json).await?;
    report(&run, definition, json)
}

/// Continue the project's latest run.
pub async fn resume(
    state: &AppState,
    definition: &Path,
    answer: Option<String>,
    decision: EscalationDecision,
    vars: &[String],
    json: bool,
) -> Result<()> {
    let workflow = load_definition(definition)?;
    let mut run = match state.engine.store().load_latest(state.project_id()).await {
        Ok(run) => run,
        Err(StateError::NotFound(_)) => {
            anyhow::bail!("no run recorded for project '{}'", state.project_id())
        }
        Err(e) => return Err(e).context("failed to load saved state"),
    };
    let variables = parse_vars(vars)?;
    let run_id = run.id;

    if let Some(escalation_id) = run.escalation.as_ref().map(|record| record.id) {
        let response = EscalationResponse {
            escalation_id,
            answer: answer.unwrap_or_default(),
            variables,
            decision,
        };
        drive(
            state,
            run_id,
            state.engine.resume_with_response(&workflow, &mut run, response),
            json,
        )
        .await?;
    } else if run.status == RunStatus::Error {
        run.variables.merge(variables);
        drive(
            state,
            run_id,
            state.engine.restart_failed(&workflow, &mut run),
            json,
        )
        .await?;
    } else {
        run.variables.merge(variables);
        drive(
            state,
            run_id,
            state.engine.resume_from_checkpoint(&workflow, &mut run),
            json,
        )
        .await?;
    }

    report(&run, definition, json)
}

/// Poll an engine entry point while printing progress events.
///
/// Ctrl+C asks the engine to pause at the next step boundary; the current
/// step finishes first.
async fn drive<F>(state: &AppState, run_id: Uuid, execution: F, json: bool) -> Result<RunStatus>
where
    F: Future<Output = Result<RunStatus, EngineError>>,
{
    let mut events = state.engine.events().follow_run(run_id);
    tokio::pin!(execution);

    let mut pause_requested = false;
    let result = loop {
        tokio::select! {
            result = &mut execution => break result,
            Some(event) = events.next() => {
                if !json {
                    print_event(&event);
                }
            }
            _ = tokio::signal::ctrl_c(), if !pause_requested => {
                pause_requested = true;
                state.engine.request_pause(run_id);
                if !json {
                    eprintln!(
                        "  {} Pausing after the current step...",
                        style("⏸").yellow()
                    );
                }
            }
        }
    };

    while let Some(event) = events.try_next() {
        if !json {
            print_event(&event);
        }
    }
    if events.missed() > 0 {
        tracing::debug!(missed = events.missed(), "progress output fell behind");
    }

    Ok(result?)
}

fn print_event(event: &KernelEvent) {
    match event {
        KernelEvent::StepCompleted { step_index, .. } => {
            println!("  {} Step {}", style("✓").green(), step_index + 1);
        }
        KernelEvent::StepSkipped {
            step_index, reason, ..
        } => {
            println!(
                "  {} Step {} skipped: {}",
                style("-").dim(),
                step_index + 1,
                style(reason).dim()
            );
        }
        KernelEvent::StepFailed {
            step_index, error, ..
        } => {
            println!("  {} Step {}: {}", style("✗").red(), step_index + 1, error);
        }
        KernelEvent::AgentInvoked {
            agent,
            model,
            duration_ms,
            estimated_cost_usd,
            success,
            ..
        } => {
            let mark = if *success {
                style("·").cyan()
            } else {
                style("·").red()
            };
            println!(
                "    {mark} {} ({model}, {:.1}s, {})",
                agent,
                *duration_ms as f64 / 1000.0,
                format_cost(*estimated_cost_usd)
            );
        }
        KernelEvent::CriticalFailure {
            operation, message, ..
        } => {
            eprintln!(
                "  {} {}: {}",
                style("!").red().bold(),
                operation,
                message
            );
        }
        _ => {}
    }
}

/// Final summary of a run after the engine returns.
fn report(run: &WorkflowRun, definition: &Path, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "run_id": run.id.to_string(),
            "project_id": run.project_id,
            "workflow": run.workflow,
            "status": run.status,
            "current_step": run.current_step,
            "checkpoints": run.checkpoints.len(),
            "total_cost_usd": run.total_cost_usd(),
            "escalation": run.escalation,
            "failure": run.failure,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    match run.status {
        RunStatus::Completed => {
            println!(
                "  {} '{}' completed: {} checkpoints, {}",
                style("*").green().bold(),
                style(&run.workflow).cyan(),
                run.checkpoints.len(),
                format_cost(run.total_cost_usd())
            );
        }
        RunStatus::Paused => match &run.escalation {
            Some(record) => {
                println!(
                    "  {} Paused at step {}: operator input needed",
                    style("?").yellow().bold(),
                    record.step_index + 1
                );
                println!("  {}", style(&record.question).bold());
                println!("  {}", style(&record.reasoning).dim());
                println!();
                println!(
                    "  Answer with: cadence resume {} --answer \"...\" [--decision proceed|skip|abort]",
                    definition.display()
                );
            }
            None => {
                println!(
                    "  {} Paused before step {}",
                    style("⏸").yellow(),
                    run.current_step + 1
                );
                println!("  Continue with: cadence resume {}", definition.display());
            }
        },
        RunStatus::Error => {
            println!("  {} '{}' failed", style("✗").red().bold(), run.workflow);
            if let Some(failure) = &run.failure {
                println!(
                    "  Step {} ({}, {}): {}",
                    failure.step_index + 1,
                    failure.error_type,
                    failure.category,
                    failure.message
                );
                match failure.last_good_checkpoint {
                    Some(sequence) => println!("  Last good checkpoint: #{sequence}"),
                    None => println!("  No earlier checkpoint"),
                }
            }
            println!(
                "  Retry the failed step with: cadence resume {}",
                definition.display()
            );
        }
        RunStatus::Pending | RunStatus::Running => {
            println!("  Run is {}", run.status);
        }
    }
    println!();
    Ok(())
}
