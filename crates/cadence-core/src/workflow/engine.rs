//! Workflow execution engine: sequential step execution with durable
//! checkpointing, escalation and operator resume.
//!
//! # Execution flow
//!
//! 1. `execute` (or one of the resume entry points) marks the run running.
//! 2. The drive loop runs steps in order from `run.current_step`, checking
//!    the pause signal and the loop guard at every step boundary.
//! 3. Each step ends in exactly one outcome: completed (checkpointed with
//!    its resume point), skipped (checkpointed), escalated (run paused with
//!    the record) or failed (final `failed` checkpoint, run in error).
//! 4. The run is persisted after every step; a failed save is reported as a
//!    critical failure and execution continues.
//!
//! Nested workflows (`invoke-workflow`, `invoke-task`) run through the same
//! loop at a greater depth; their checkpoints stay in memory.

use std::sync::Arc;

use cadence_types::config::KernelConfig;
use cadence_types::error::{Component, ErrorCategory, ErrorContext, ErrorType};
use cadence_types::escalation::{EscalationDecision, EscalationResponse};
use cadence_types::event::KernelEvent;
use cadence_types::workflow::{CheckpointStatus, RunFailure, RunStatus, WorkflowRun};
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::AgentPool;
use crate::error::{Classified, ErrorClassifier, EscalationSink, Escalator, RetryExecutor};
use crate::event::EventBus;
use crate::state::StateStore;

use super::collaborators::{
    ActionRunner, BoxFuture, FsWorkflowLoader, NoopActionRunner, NoopTemplateRenderer,
    TemplateRenderer, WorkflowLoader,
};
use super::definition::LoadedWorkflow;
use super::step_runner::StepOutcome;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Misuse of the engine's entry points. Step failures never surface here;
/// they end up in the run's status.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("run {run_id} cannot be executed from status '{status}'")]
    NotRunnable { run_id: Uuid, status: RunStatus },

    #[error("run {run_id} is not paused")]
    NotPaused { run_id: Uuid },

    #[error("run {run_id} is waiting on an operator response")]
    AwaitingResponse { run_id: Uuid },

    #[error("run {run_id} has no pending escalation")]
    NoEscalation { run_id: Uuid },

    #[error("response is for escalation {received}, but run is waiting on {expected}")]
    EscalationMismatch { expected: Uuid, received: Uuid },

    #[error("run {run_id} has no failed checkpoint to restart from")]
    NothingToRestart { run_id: Uuid },

    #[error("run belongs to workflow '{run_workflow}', not '{workflow}'")]
    WorkflowMismatch { workflow: String, run_workflow: String },
}

impl Classified for EngineError {
    fn category(&self) -> ErrorCategory {
        match self {
            EngineError::WorkflowMismatch { .. } => ErrorCategory::Validation,
            _ => ErrorCategory::Conflict,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Sequential workflow executor.
///
/// Generic over `S: StateStore` for storage flexibility. Collaborators
/// default to no-op implementations and the filesystem loader.
pub struct WorkflowEngine<S: StateStore> {
    pub(super) store: Arc<S>,
    pub(super) pool: Arc<AgentPool>,
    pub(super) kernel: KernelConfig,
    pub(super) events: EventBus,
    pub(super) classifier: ErrorClassifier,
    pub(super) escalator: Escalator,
    pub(super) retry: RetryExecutor,
    pub(super) actions: Arc<dyn ActionRunner>,
    pub(super) renderer: Arc<dyn TemplateRenderer>,
    pub(super) loader: Arc<dyn WorkflowLoader>,
    /// Pause signals keyed by run_id.
    pause_signals: DashMap<Uuid, CancellationToken>,
}

impl<S: StateStore> WorkflowEngine<S> {
    pub fn new(
        store: Arc<S>,
        pool: Arc<AgentPool>,
        escalations: Arc<dyn EscalationSink>,
        events: EventBus,
    ) -> Self {
        let kernel = pool.config().kernel.clone();
        Self {
            store,
            retry: RetryExecutor::new(kernel.retry.clone()),
            kernel,
            classifier: ErrorClassifier::new(events.clone()),
            escalator: Escalator::new(escalations, events.clone()),
            events,
            pool,
            actions: Arc::new(NoopActionRunner),
            renderer: Arc::new(NoopTemplateRenderer),
            loader: Arc::new(FsWorkflowLoader),
            pause_signals: DashMap::new(),
        }
    }

    pub fn with_action_runner(mut self, actions: Arc<dyn ActionRunner>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_template_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_workflow_loader(mut self, loader: Arc<dyn WorkflowLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn pool(&self) -> &AgentPool {
        &self.pool
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Run from `run.current_step` until the run completes, pauses or errors.
    pub async fn execute(
        &self,
        workflow: &LoadedWorkflow,
        run: &mut WorkflowRun,
    ) -> Result<RunStatus, EngineError> {
        self.forget_if_completed(run);
        check_workflow(workflow, run)?;
        match run.status {
            RunStatus::Pending => {
                self.events.publish(KernelEvent::RunStarted {
                    run_id: run.id,
                    project_id: run.project_id.clone(),
                    workflow: run.workflow.clone(),
                    step_count: workflow.step_count(),
                });
            }
            RunStatus::Running => {}
            status => {
                return Err(EngineError::NotRunnable {
                    run_id: run.id,
                    status,
                });
            }
        }

        tracing::info!(
            run_id = %run.id,
            project_id = %run.project_id,
            workflow = workflow.name(),
            steps = workflow.step_count(),
            "starting workflow execution"
        );
        self.drive_top(workflow, run, Vec::new()).await
    }

    /// Rehydrate from the latest checkpoint and continue.
    ///
    /// The checkpointed step is never re-run: execution continues at the
    /// checkpoint's `next_step`.
    pub async fn resume_from_checkpoint(
        &self,
        workflow: &LoadedWorkflow,
        run: &mut WorkflowRun,
    ) -> Result<RunStatus, EngineError> {
        self.forget_if_completed(run);
        check_workflow(workflow, run)?;
        if run.status.is_terminal() {
            return Err(EngineError::NotRunnable {
                run_id: run.id,
                status: run.status,
            });
        }
        if run.escalation.is_some() {
            return Err(EngineError::AwaitingResponse { run_id: run.id });
        }

        let rehydrated = run.rehydrate();
        run.status = RunStatus::Running;
        tracing::info!(
            run_id = %run.id,
            step = run.current_step + 1,
            from_checkpoint = rehydrated,
            "resuming workflow execution"
        );
        self.drive_top(workflow, run, Vec::new()).await
    }

    /// Apply an operator's answer to a paused run and continue.
    pub async fn resume_with_response(
        &self,
        workflow: &LoadedWorkflow,
        run: &mut WorkflowRun,
        response: EscalationResponse,
    ) -> Result<RunStatus, EngineError> {
        self.forget_if_completed(run);
        check_workflow(workflow, run)?;
        if run.status != RunStatus::Paused {
            return Err(EngineError::NotPaused { run_id: run.id });
        }
        let Some(record) = run.escalation.clone() else {
            return Err(EngineError::NoEscalation { run_id: run.id });
        };
        if record.id != response.escalation_id {
            return Err(EngineError::EscalationMismatch {
                expected: record.id,
                received: response.escalation_id,
            });
        }

        run.variables.merge(response.variables);
        run.variables
            .set("human_response", Value::String(response.answer.clone()));
        run.escalation = None;
        run.steps_executed = 0;
        run.status = RunStatus::Running;

        let step_index = run.current_step;
        tracing::info!(
            run_id = %run.id,
            escalation_id = %record.id,
            step = step_index + 1,
            decision = ?response.decision,
            "operator responded to escalation"
        );

        match response.decision {
            EscalationDecision::Proceed => {
                let bypass = record.gate_path.clone().unwrap_or_default();
                self.drive_top(workflow, run, bypass).await
            }
            EscalationDecision::Skip => {
                if step_index < workflow.step_count() {
                    run.current_step = step_index + 1;
                    let sequence = run.record_checkpoint(
                        step_index,
                        step_index + 1,
                        CheckpointStatus::Skipped,
                        false,
                        Some("skipped by operator".to_string()),
                    );
                    self.events.publish(KernelEvent::StepSkipped {
                        run_id: run.id,
                        step_index,
                        reason: "skipped by operator".to_string(),
                    });
                    self.persist(run, 0, Some((sequence, CheckpointStatus::Skipped)))
                        .await;
                }
                self.drive_top(workflow, run, Vec::new()).await
            }
            EscalationDecision::Abort => {
                let category = record
                    .context
                    .get("category")
                    .cloned()
                    .and_then(|v| serde_json::from_value::<ErrorCategory>(v).ok())
                    .unwrap_or(ErrorCategory::Unknown);
                let message = if response.answer.is_empty() {
                    "aborted by operator".to_string()
                } else {
                    format!("aborted by operator: {}", response.answer)
                };
                self.fail_run(run, 0, step_index, ErrorType::Escalation, category, message)
                    .await;
                Ok(RunStatus::Error)
            }
        }
    }

    /// Ask a running run to pause at its next step boundary.
    ///
    /// In-flight agent calls finish first. A request for a run that is not
    /// executing takes effect when it next executes.
    pub fn request_pause(&self, run_id: Uuid) {
        self.pause_signals.entry(run_id).or_default().cancel();
        tracing::info!(run_id = %run_id, "pause requested");
    }

    /// Withdraw a pause request for a run that is not executing.
    ///
    /// Returns whether one was pending. An executing run already holds its
    /// signal and still pauses at the next boundary.
    pub fn cancel_pause_request(&self, run_id: Uuid) -> bool {
        self.pause_signals
            .remove_if(&run_id, |_, token| token.is_cancelled())
            .is_some()
    }

    /// A completed run never executes again; drop any pause request for it.
    fn forget_if_completed(&self, run: &WorkflowRun) {
        if run.status == RunStatus::Completed && self.pause_signals.remove(&run.id).is_some() {
            tracing::debug!(run_id = %run.id, "dropped pause request for completed run");
        }
    }

    /// Rewind an errored run to its most recent failed step and re-run it.
    pub async fn restart_failed(
        &self,
        workflow: &LoadedWorkflow,
        run: &mut WorkflowRun,
    ) -> Result<RunStatus, EngineError> {
        self.forget_if_completed(run);
        check_workflow(workflow, run)?;
        if run.status != RunStatus::Error {
            return Err(EngineError::NotRunnable {
                run_id: run.id,
                status: run.status,
            });
        }
        let Some(failed) = run
            .checkpoints
            .iter()
            .rev()
            .find(|cp| cp.status == CheckpointStatus::Failed)
            .cloned()
        else {
            return Err(EngineError::NothingToRestart { run_id: run.id });
        };

        run.current_step = failed.step_index;
        run.variables = failed.variables;
        run.failure = None;
        run.escalation = None;
        run.steps_executed = 0;
        run.status = RunStatus::Running;
        tracing::info!(
            run_id = %run.id,
            step = run.current_step + 1,
            "restarting failed step"
        );
        self.drive_top(workflow, run, Vec::new()).await
    }

    // -----------------------------------------------------------------------
    // Drive loop
    // -----------------------------------------------------------------------

    async fn drive_top(
        &self,
        workflow: &LoadedWorkflow,
        run: &mut WorkflowRun,
        bypass: Vec<usize>,
    ) -> Result<RunStatus, EngineError> {
        let pause = self.pause_signals.entry(run.id).or_default().clone();
        let result = self.drive(workflow, run, 0, bypass, Some(pause)).await;
        self.pause_signals.remove(&run.id);
        result
    }

    /// Execute a nested run to completion at `depth`.
    pub(super) fn execute_nested<'a>(
        &'a self,
        workflow: &'a LoadedWorkflow,
        run: &'a mut WorkflowRun,
        depth: usize,
        bypass: Vec<usize>,
    ) -> BoxFuture<'a, Result<RunStatus, EngineError>> {
        self.drive(workflow, run, depth, bypass, None)
    }

    /// `bypass` is a gate path; it applies once, at the first execution of
    /// the step it starts with.
    fn drive<'a>(
        &'a self,
        workflow: &'a LoadedWorkflow,
        run: &'a mut WorkflowRun,
        depth: usize,
        mut bypass: Vec<usize>,
        pause: Option<CancellationToken>,
    ) -> BoxFuture<'a, Result<RunStatus, EngineError>> {
        Box::pin(async move {
            run.status = RunStatus::Running;
            let step_count = workflow.step_count();
            let loop_limit = self.kernel.loop_guard_multiplier.max(1) as usize * step_count;

            loop {
                let step_index = run.current_step;

                if step_index >= step_count {
                    run.status = RunStatus::Completed;
                    run.touch();
                    self.persist(run, depth, None).await;
                    tracing::info!(
                        run_id = %run.id,
                        depth,
                        steps_executed = run.steps_executed,
                        "workflow completed"
                    );
                    self.events.publish(KernelEvent::RunCompleted {
                        run_id: run.id,
                        steps_executed: run.steps_executed,
                        total_cost_usd: run.total_cost_usd(),
                    });
                    return Ok(RunStatus::Completed);
                }

                if pause.as_ref().is_some_and(CancellationToken::is_cancelled) {
                    run.status = RunStatus::Paused;
                    run.touch();
                    self.persist(run, depth, None).await;
                    tracing::info!(run_id = %run.id, step = step_index + 1, "paused on request");
                    self.events.publish(KernelEvent::RunPaused {
                        run_id: run.id,
                        step_index,
                    });
                    return Ok(RunStatus::Paused);
                }

                let outcome = if run.steps_executed as usize >= loop_limit {
                    let context = ErrorContext::new(
                        Component::Engine,
                        "loop_guard",
                        ErrorCategory::LoopGuard,
                        format!(
                            "{} step executions in a {step_count}-step workflow",
                            run.steps_executed
                        ),
                    )
                    .with_project(run.project_id.clone())
                    .with_workflow(run.workflow.clone())
                    .with_step(step_index);
                    let record = self
                        .raise(
                            run.id,
                            &context,
                            depth,
                            format!(
                                "Possible loop: {} steps executed in a {step_count}-step workflow. Continue?",
                                run.steps_executed
                            ),
                            format!(
                                "Loop guard allows {} executions per step",
                                self.kernel.loop_guard_multiplier
                            ),
                            None,
                        )
                        .await;
                    StepOutcome::Escalated(Box::new(record))
                } else {
                    run.steps_executed += 1;
                    let gate = if bypass.first() == Some(&step_index) {
                        std::mem::take(&mut bypass)
                    } else {
                        Vec::new()
                    };
                    self.run_step(workflow, run, step_index, depth, gate).await
                };

                match outcome {
                    StepOutcome::Completed { next_step, jump } => {
                        run.current_step = next_step;
                        let sequence = run.record_checkpoint(
                            step_index,
                            next_step,
                            CheckpointStatus::Completed,
                            jump,
                            None,
                        );
                        tracing::info!(
                            run_id = %run.id,
                            step = step_index + 1,
                            next = next_step + 1,
                            jump,
                            "step completed"
                        );
                        self.events.publish(KernelEvent::StepCompleted {
                            run_id: run.id,
                            step_index,
                            next_step,
                        });
                        self.persist(run, depth, Some((sequence, CheckpointStatus::Completed)))
                            .await;
                    }
                    StepOutcome::Skipped { reason } => {
                        run.current_step = step_index + 1;
                        let sequence = run.record_checkpoint(
                            step_index,
                            step_index + 1,
                            CheckpointStatus::Skipped,
                            false,
                            Some(reason.clone()),
                        );
                        tracing::info!(
                            run_id = %run.id,
                            step = step_index + 1,
                            "step skipped: {reason}"
                        );
                        self.events.publish(KernelEvent::StepSkipped {
                            run_id: run.id,
                            step_index,
                            reason,
                        });
                        self.persist(run, depth, Some((sequence, CheckpointStatus::Skipped)))
                            .await;
                    }
                    StepOutcome::Escalated(record) => {
                        run.status = RunStatus::Paused;
                        run.escalation = Some(*record);
                        run.touch();
                        self.persist(run, depth, None).await;
                        self.events.publish(KernelEvent::RunPaused {
                            run_id: run.id,
                            step_index,
                        });
                        return Ok(RunStatus::Paused);
                    }
                    StepOutcome::Failed {
                        error_type,
                        category,
                        message,
                    } => {
                        self.fail_run(run, depth, step_index, error_type, category, message)
                            .await;
                        return Ok(RunStatus::Error);
                    }
                }
            }
        })
    }

    /// Record a final `failed` checkpoint and move the run to `error`.
    async fn fail_run(
        &self,
        run: &mut WorkflowRun,
        depth: usize,
        step_index: usize,
        error_type: ErrorType,
        category: ErrorCategory,
        message: String,
    ) {
        let last_good_checkpoint = run.last_good_checkpoint().map(|cp| cp.sequence);
        run.current_step = step_index;
        let sequence = run.record_checkpoint(
            step_index,
            step_index,
            CheckpointStatus::Failed,
            false,
            Some(message.clone()),
        );
        run.failure = Some(RunFailure {
            step_index,
            error_type,
            category,
            message: message.clone(),
            last_good_checkpoint,
        });
        run.status = RunStatus::Error;

        tracing::error!(
            run_id = %run.id,
            step = step_index + 1,
            error_type = %error_type,
            category = %category,
            "workflow failed: {message}"
        );
        self.events.publish(KernelEvent::StepFailed {
            run_id: run.id,
            step_index,
            error_type,
            error: message.clone(),
        });
        self.persist(run, depth, Some((sequence, CheckpointStatus::Failed)))
            .await;
        self.events.publish(KernelEvent::RunFailed {
            run_id: run.id,
            step_index,
            error: message,
        });
    }

    /// Save the run. Nested runs (depth > 0) stay in memory.
    async fn persist(
        &self,
        run: &WorkflowRun,
        depth: usize,
        checkpoint: Option<(u64, CheckpointStatus)>,
    ) {
        if depth > 0 {
            return;
        }
        match self.store.save_checkpoint(run).await {
            Ok(()) => {
                if let Some((sequence, status)) = checkpoint {
                    tracing::debug!(run_id = %run.id, sequence, %status, "checkpoint saved");
                    self.events.publish(KernelEvent::CheckpointSaved {
                        run_id: run.id,
                        sequence,
                        status,
                    });
                }
            }
            Err(e) => {
                let context = ErrorContext::new(
                    Component::StateStore,
                    "save_checkpoint",
                    e.category(),
                    e.to_string(),
                )
                .with_project(run.project_id.clone())
                .with_workflow(run.workflow.clone())
                .with_step(run.current_step);
                self.classifier.report_critical(&context);
            }
        }
    }
}

fn check_workflow(workflow: &LoadedWorkflow, run: &WorkflowRun) -> Result<(), EngineError> {
    if workflow.name() != run.workflow {
        return Err(EngineError::WorkflowMismatch {
            workflow: workflow.name().to_string(),
            run_workflow: run.workflow.clone(),
        });
    }
    Ok(())
}

impl<S: StateStore> std::fmt::Debug for WorkflowEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("pool", &self.pool)
            .field("active_runs", &self.pause_signals.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
