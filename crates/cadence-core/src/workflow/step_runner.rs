//! Step execution: condition gate, directive dispatch and failure handling.
//!
//! Directives run in document order against a scratch copy of the run's
//! variables. The scratch copy replaces the run's variables only when the
//! whole step succeeds, so a failed or escalated step leaves no partial
//! writes behind. Agent activities are appended either way.

use std::collections::BTreeMap;
use std::path::Path;

use cadence_types::agent::{AgentActivity, AgentTask};
use cadence_types::error::{
    Component, ErrorCategory, ErrorContext, ErrorType, WorkflowError,
};
use cadence_types::escalation::EscalationRecord;
use cadence_types::variables::Variables;
use cadence_types::workflow::{Directive, RunStatus, Step, WorkflowRun};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::agent::{InvocationContext, PoolError};
use crate::error::{Classified, RetryDecision, classify_error};
use crate::state::StateStore;

use super::collaborators::{ActionRequest, BoxFuture, CollaboratorError, RenderRequest};
use super::condition::{Condition, ConditionError, evaluate_condition};
use super::definition::LoadedWorkflow;
use super::engine::WorkflowEngine;
use super::template::{resolve_inputs, resolve_template};

// ---------------------------------------------------------------------------
// Outcomes and errors
// ---------------------------------------------------------------------------

/// How a single step ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// All directives ran; continue at `next_step`.
    Completed { next_step: usize, jump: bool },
    /// Optional step whose condition was false.
    Skipped { reason: String },
    /// A human must answer before the step can continue.
    Escalated(Box<EscalationRecord>),
    /// Structural failure; the run ends in error.
    Failed {
        error_type: ErrorType,
        category: ErrorCategory,
        message: String,
    },
}

/// A directive failure inside a step.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error(transparent)]
    Condition(#[from] ConditionError),

    #[error("agent '{agent}' failed: {source}")]
    Dispatch {
        agent: String,
        #[source]
        source: PoolError,
    },

    #[error("action failed: {0}")]
    Action(#[source] CollaboratorError),

    #[error("template section '{section}' failed: {source}")]
    Template {
        section: String,
        #[source]
        source: CollaboratorError,
    },

    #[error("cannot load '{path}': {source}")]
    Load {
        path: String,
        #[source]
        source: WorkflowError,
    },

    #[error("sub-workflow nesting exceeds the maximum depth of {max}")]
    DepthExceeded { max: usize },

    #[error("goto targets step {target}, but the workflow has {step_count} steps")]
    InvalidGoto { target: usize, step_count: usize },

    #[error("sub-workflow '{path}' paused: {question}")]
    SubWorkflowPaused {
        path: String,
        question: String,
        reasoning: String,
        /// Gate path inside the nested run, when a gate blocked it.
        gate_path: Option<Vec<usize>>,
    },

    #[error("sub-workflow '{path}' failed: {message}")]
    SubWorkflowFailed {
        path: String,
        category: ErrorCategory,
        message: String,
    },
}

impl StepError {
    /// Failures no operator answer can fix in place: the run ends in error.
    pub fn is_structural(&self) -> bool {
        match self {
            StepError::DepthExceeded { .. }
            | StepError::InvalidGoto { .. }
            | StepError::SubWorkflowFailed { .. } => true,
            StepError::Load { source, .. } => matches!(
                source,
                WorkflowError::Parse(_)
                    | WorkflowError::Instructions { .. }
                    | WorkflowError::Validation(_)
            ),
            _ => false,
        }
    }
}

impl Classified for StepError {
    fn category(&self) -> ErrorCategory {
        match self {
            StepError::Condition(e) => e.category(),
            StepError::Dispatch { source, .. } => source.category(),
            StepError::Action(source) | StepError::Template { source, .. } => source.category(),
            StepError::Load { source, .. } => source.category(),
            StepError::DepthExceeded { .. } | StepError::InvalidGoto { .. } => {
                ErrorCategory::Validation
            }
            StepError::SubWorkflowPaused { .. } => ErrorCategory::Unknown,
            StepError::SubWorkflowFailed { category, .. } => *category,
        }
    }

    fn retries_exhausted(&self) -> bool {
        match self {
            StepError::Dispatch { source, .. } => source.retries_exhausted(),
            _ => false,
        }
    }
    fn requires_operator(&self) -> bool {
        match self {
            StepError::Dispatch { source, .. } => source.requires_operator(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Step scope
// ---------------------------------------------------------------------------

/// Identity of the step being executed, shared by every directive.
struct StepFrame<'a> {
    workflow: &'a LoadedWorkflow,
    step: &'a Step,
    run_id: Uuid,
    project_id: String,
    depth: usize,
}

impl StepFrame<'_> {
    fn context(&self, operation: &str, error: &StepError) -> ErrorContext {
        ErrorContext::new(
            Component::Engine,
            operation,
            error.category(),
            error.to_string(),
        )
        .with_project(self.project_id.clone())
        .with_workflow(self.workflow.name())
        .with_step(self.step.index)
        .optional(self.step.optional)
    }
}

/// Mutable state of one step attempt.
struct StepScope {
    variables: Variables,
    activities: Vec<AgentActivity>,
    /// Target of a goto, as a 0-based step index.
    jump: Option<usize>,
    /// Gate to bypass in the next nested run, as a path of step indices.
    nested_bypass: Vec<usize>,
}

/// Whether directive execution continues after a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Jump,
}

#[derive(Debug, Clone, Copy)]
enum NestedKind {
    Workflow,
    Task,
}

// ---------------------------------------------------------------------------
// Step execution
// ---------------------------------------------------------------------------

impl<S: StateStore> WorkflowEngine<S> {
    /// Execute one step of a top-level run without checkpointing it.
    ///
    /// Commits the step's variables and appends its activities to `run`.
    /// The caller decides what to record for the returned outcome.
    pub async fn execute_step(
        &self,
        workflow: &LoadedWorkflow,
        run: &mut WorkflowRun,
        step_index: usize,
    ) -> StepOutcome {
        self.run_step(workflow, run, step_index, 0, Vec::new()).await
    }

    /// `bypass` is a gate path starting at this step: `[step_index]` skips
    /// this step's condition gate, a longer path is handed to the first
    /// nested run the step invokes.
    pub(super) async fn run_step(
        &self,
        workflow: &LoadedWorkflow,
        run: &mut WorkflowRun,
        step_index: usize,
        depth: usize,
        bypass: Vec<usize>,
    ) -> StepOutcome {
        let Some(step) = workflow.steps.get(step_index) else {
            return StepOutcome::Failed {
                error_type: ErrorType::Escalation,
                category: ErrorCategory::Validation,
                message: format!(
                    "step {} does not exist in a {}-step workflow",
                    step_index + 1,
                    workflow.step_count()
                ),
            };
        };
        let frame = StepFrame {
            workflow,
            step,
            run_id: run.id,
            project_id: run.project_id.clone(),
            depth,
        };

        tracing::info!(
            run_id = %run.id,
            step = step.number(),
            goal = %step.goal,
            depth,
            "executing step"
        );

        let (bypass_gate, mut nested_bypass) = match bypass.split_first() {
            Some((_, [])) => (true, Vec::new()),
            Some((_, rest)) => (false, rest.to_vec()),
            None => (false, Vec::new()),
        };
        if let Some(outcome) = self.gate(&frame, run, bypass_gate).await {
            return outcome;
        }

        let mut attempt = 1;
        loop {
            let mut scope = StepScope {
                variables: run.variables.clone(),
                activities: Vec::new(),
                jump: None,
                nested_bypass: std::mem::take(&mut nested_bypass),
            };
            let result = self
                .execute_directives(&frame, &step.directives, &mut scope)
                .await;
            run.activities.append(&mut scope.activities);

            let err = match result {
                Ok(_) => {
                    run.variables = scope.variables;
                    let (next_step, jump) = match scope.jump {
                        Some(target) => (target, true),
                        None => (step_index + 1, false),
                    };
                    return StepOutcome::Completed { next_step, jump };
                }
                Err(err) => err,
            };

            let context = frame.context("execute_step", &err).with_attempt(attempt);

            if let StepError::SubWorkflowPaused {
                question,
                reasoning,
                gate_path,
                ..
            } = &err
            {
                let gate_path = gate_path
                    .as_ref()
                    .map(|inner| std::iter::once(step_index).chain(inner.iter().copied()).collect());
                let record = self
                    .raise(
                        run.id,
                        &context,
                        depth,
                        question.clone(),
                        reasoning.clone(),
                        gate_path,
                    )
                    .await;
                return StepOutcome::Escalated(Box::new(record));
            }

            if err.is_structural() {
                return StepOutcome::Failed {
                    error_type: ErrorType::Escalation,
                    category: err.category(),
                    message: err.to_string(),
                };
            }

            match self.retry.decide(attempt, &err, &context) {
                RetryDecision::Retry { delay } => {
                    tracing::warn!(
                        run_id = %run.id,
                        step = step.number(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "step failed, retrying: {err}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp { error_type, .. } => {
                    tracing::warn!(
                        run_id = %run.id,
                        step = step.number(),
                        error_type = %error_type,
                        category = %err.category(),
                        "step failed: {err}"
                    );
                    let record = self
                        .raise(
                            run.id,
                            &context,
                            depth,
                            format!(
                                "Step {} ({}) failed: {err}. How should we proceed?",
                                step.number(),
                                step.goal
                            ),
                            format!(
                                "{} failure after {attempt} attempt(s)",
                                err.category()
                            ),
                            None,
                        )
                        .await;
                    return StepOutcome::Escalated(Box::new(record));
                }
            }
        }
    }

    /// Evaluate the step's condition. `Some` ends the step before any directive.
    async fn gate(
        &self,
        frame: &StepFrame<'_>,
        run: &WorkflowRun,
        bypass: bool,
    ) -> Option<StepOutcome> {
        let condition = frame.step.condition.as_deref()?;
        if bypass {
            tracing::debug!(
                run_id = %run.id,
                step = frame.step.number(),
                "condition gate bypassed by operator"
            );
            return None;
        }

        let (question, reasoning, category) = match evaluate_condition(condition, &run.variables) {
            Ok(true) => return None,
            Ok(false) if frame.step.optional => {
                return Some(StepOutcome::Skipped {
                    reason: format!("condition `{condition}` is false"),
                });
            }
            Ok(false) => (
                frame.step.goal.clone(),
                format!(
                    "Required step {} is blocked: condition `{condition}` is false",
                    frame.step.number()
                ),
                ErrorCategory::Validation,
            ),
            Err(e) => (
                format!("Step {} has an invalid condition. How should we proceed?", frame.step.number()),
                e.to_string(),
                e.category(),
            ),
        };

        let context = ErrorContext::new(
            Component::Engine,
            "evaluate_condition",
            category,
            reasoning.clone(),
        )
        .with_project(frame.project_id.clone())
        .with_workflow(frame.workflow.name())
        .with_step(frame.step.index);
        let record = self
            .raise(
                run.id,
                &context,
                frame.depth,
                question,
                reasoning,
                Some(vec![frame.step.index]),
            )
            .await;
        Some(StepOutcome::Escalated(Box::new(record)))
    }

    /// Build an escalation record; top-level runs also deliver it.
    pub(super) async fn raise(
        &self,
        run_id: Uuid,
        context: &ErrorContext,
        depth: usize,
        question: String,
        reasoning: String,
        gate_path: Option<Vec<usize>>,
    ) -> EscalationRecord {
        let mut record = self.escalator.record(run_id, context, question, reasoning);
        record.gate_path = gate_path;
        if depth == 0 {
            self.escalator.deliver(record).await
        } else {
            record
        }
    }

    // -----------------------------------------------------------------------
    // Directives
    // -----------------------------------------------------------------------

    fn execute_directives<'a>(
        &'a self,
        frame: &'a StepFrame<'a>,
        directives: &'a [Directive],
        scope: &'a mut StepScope,
    ) -> BoxFuture<'a, Result<Flow, StepError>> {
        Box::pin(async move {
            for directive in directives {
                match self.run_directive(frame, directive, scope).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Jump) => return Ok(Flow::Jump),
                    Err(err) => {
                        let context = frame.context(directive.tag(), &err);
                        if !err.is_structural()
                            && classify_error(&err, &context) == ErrorType::Recoverable
                        {
                            tracing::warn!(
                                run_id = %frame.run_id,
                                step = frame.step.number(),
                                directive = directive.tag(),
                                "recoverable failure, skipping directive: {err}"
                            );
                            continue;
                        }
                        return Err(err);
                    }
                }
            }
            Ok(Flow::Continue)
        })
    }

    async fn run_directive(
        &self,
        frame: &StepFrame<'_>,
        directive: &Directive,
        scope: &mut StepScope,
    ) -> Result<Flow, StepError> {
        match directive {
            Directive::Action { text, assignments } => {
                for assignment in assignments {
                    let value = match &assignment.value {
                        Value::String(s) => Value::String(resolve_template(s, &scope.variables)),
                        other => other.clone(),
                    };
                    scope.variables.set_path(&assignment.name, value);
                }
                let text = resolve_template(text, &scope.variables);
                if text.trim().is_empty() {
                    return Ok(Flow::Continue);
                }
                let produced = self
                    .actions
                    .run(ActionRequest {
                        run_id: frame.run_id,
                        project_id: &frame.project_id,
                        workflow: frame.workflow.name(),
                        step_index: frame.step.index,
                        text,
                        variables: &scope.variables,
                    })
                    .await
                    .map_err(StepError::Action)?;
                scope.variables.merge(produced);
                Ok(Flow::Continue)
            }

            Directive::Ask {
                agent,
                prompt,
                store_as,
            } => {
                let prompt = resolve_template(prompt, &scope.variables);
                let task = AgentTask::new(
                    frame.project_id.clone(),
                    frame.step.index,
                    agent.clone(),
                    prompt,
                );
                let instructions = frame.step.instructions.trim();
                let context = InvocationContext {
                    project_id: frame.project_id.clone(),
                    run_id: Some(frame.run_id),
                    workflow: Some(frame.workflow.name().to_string()),
                    step_number: Some(frame.step.number()),
                    step_goal: Some(frame.step.goal.clone()),
                    instructions: (!instructions.is_empty())
                        .then(|| resolve_template(instructions, &scope.variables)),
                };

                let dispatch = self.pool.dispatch(&task, context).await;
                scope.activities.push(dispatch.activity);
                let response = dispatch.outcome.map_err(|source| StepError::Dispatch {
                    agent: agent.clone(),
                    source,
                })?;
                scope.variables.set_path(store_as, Value::String(response));
                Ok(Flow::Continue)
            }

            Directive::Check { condition, body } => {
                let condition = Condition::parse(condition)?;
                if condition.evaluate(&scope.variables) {
                    self.execute_directives(frame, body, scope).await
                } else {
                    Ok(Flow::Continue)
                }
            }

            Directive::Goto { step } => {
                let step_count = frame.workflow.step_count();
                if *step == 0 || *step > step_count {
                    return Err(StepError::InvalidGoto {
                        target: *step,
                        step_count,
                    });
                }
                scope.jump = Some(step - 1);
                Ok(Flow::Jump)
            }

            Directive::InvokeWorkflow { path, inputs } => {
                self.invoke_nested(frame, NestedKind::Workflow, path, inputs, scope)
                    .await
            }

            Directive::InvokeTask { path, inputs } => {
                self.invoke_nested(frame, NestedKind::Task, path, inputs, scope)
                    .await
            }

            Directive::TemplateOutput { section } => {
                let rendered = self
                    .renderer
                    .render(RenderRequest {
                        run_id: frame.run_id,
                        project_id: &frame.project_id,
                        workflow: frame.workflow,
                        section,
                        variables: &scope.variables,
                    })
                    .await
                    .map_err(|source| StepError::Template {
                        section: section.clone(),
                        source,
                    })?;
                scope.variables.set_path(section, Value::String(rendered));
                Ok(Flow::Continue)
            }
        }
    }

    /// Run a nested workflow or task to completion inside the current step.
    async fn invoke_nested(
        &self,
        frame: &StepFrame<'_>,
        kind: NestedKind,
        path: &Path,
        inputs: &BTreeMap<String, String>,
        scope: &mut StepScope,
    ) -> Result<Flow, StepError> {
        let max = self.kernel.max_sub_workflow_depth;
        if frame.depth + 1 > max {
            return Err(StepError::DepthExceeded { max });
        }

        let resolved = frame.workflow.resolve_path(path);
        let display = resolved.display().to_string();
        let loaded = match kind {
            NestedKind::Workflow => self.loader.load_workflow(&resolved).await,
            NestedKind::Task => self.loader.load_task(&resolved).await,
        }
        .map_err(|source| StepError::Load {
            path: display.clone(),
            source,
        })?;

        let mut variables = scope.variables.clone();
        variables.merge(resolve_inputs(inputs, &scope.variables));
        for (name, value) in &loaded.definition.variables {
            if variables.get(name).is_none() {
                variables.set(name.clone(), value.clone());
            }
        }

        let mut nested = WorkflowRun::new(frame.project_id.clone(), loaded.name(), variables);
        tracing::info!(
            run_id = %frame.run_id,
            nested_run_id = %nested.id,
            workflow = loaded.name(),
            depth = frame.depth + 1,
            "invoking nested workflow"
        );

        let bypass = std::mem::take(&mut scope.nested_bypass);
        let status = self
            .execute_nested(&loaded, &mut nested, frame.depth + 1, bypass)
            .await
            .map_err(|e| StepError::SubWorkflowFailed {
                path: display.clone(),
                category: e.category(),
                message: e.to_string(),
            })?;
        scope.activities.append(&mut nested.activities);

        match status {
            RunStatus::Completed => {
                scope.variables = nested.variables;
                Ok(Flow::Continue)
            }
            RunStatus::Paused => {
                let (question, reasoning, gate_path) = match nested.escalation {
                    Some(record) => (
                        record.question,
                        format!(
                            "Sub-workflow '{}' paused at step {}: {}",
                            loaded.name(),
                            record.step_index + 1,
                            record.reasoning
                        ),
                        record.gate_path,
                    ),
                    None => (
                        format!("Sub-workflow '{}' paused. Continue?", loaded.name()),
                        String::new(),
                        None,
                    ),
                };
                Err(StepError::SubWorkflowPaused {
                    path: display,
                    question,
                    reasoning,
                    gate_path,
                })
            }
            other => {
                let (category, message) = match nested.failure {
                    Some(failure) => (
                        failure.category,
                        format!("step {}: {}", failure.step_index + 1, failure.message),
                    ),
                    None => (ErrorCategory::Unknown, format!("ended in status '{other}'")),
                };
                Err(StepError::SubWorkflowFailed {
                    path: display,
                    category,
                    message,
                })
            }
        }
    }
}
