//! Workflow domain types for Cadence.
//!
//! Defines the workflow definition file, the parsed step sequence with its
//! closed set of directives, and the execution tracking types
//! (`WorkflowRun`, `Checkpoint`, `RunFailure`).

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agent::AgentActivity;
use crate::error::{ErrorCategory, ErrorType};
use crate::escalation::EscalationRecord;
use crate::variables::Variables;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A workflow definition file (`workflow.yaml`).
///
/// Paths are relative to the directory holding the definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name. Alphanumeric, hyphens and underscores.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Path to the step-instruction document.
    pub instructions: PathBuf,
    /// Optional output template consumed by `template-output` directives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PathBuf>,
    /// Default output document path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_output: Option<PathBuf>,
    /// Declared variables and their defaults.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Steps and directives
// ---------------------------------------------------------------------------

/// One instruction unit of a workflow. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 0-based position in the step sequence.
    pub index: usize,
    /// Free-text goal (the `goal` attribute).
    pub goal: String,
    /// Plain instruction text found outside of directive tags.
    #[serde(default)]
    pub instructions: String,
    /// Tagged directives in document order.
    #[serde(default)]
    pub directives: Vec<Directive>,
    /// Condition predicate gating the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Whether a false condition skips the step instead of escalating.
    #[serde(default)]
    pub optional: bool,
}

impl Step {
    /// 1-based step number as written in the instruction document.
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

/// A tagged step directive. Closed set: the engine matches exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Directive {
    /// Side-effecting operation delegated to the action collaborator.
    Action {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        assignments: Vec<Assignment>,
    },
    /// Request agent work from the dispatch pool.
    Ask {
        agent: String,
        prompt: String,
        /// Variable receiving the agent's response.
        store_as: String,
    },
    /// Conditional check guarding nested directives.
    Check {
        condition: String,
        body: Vec<Directive>,
    },
    /// Jump to a step by its 1-based number.
    Goto { step: usize },
    /// Run another workflow definition to completion.
    InvokeWorkflow {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        inputs: BTreeMap<String, String>,
    },
    /// Run a standalone task document to completion.
    InvokeTask {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        inputs: BTreeMap<String, String>,
    },
    /// Render a template section through the template collaborator.
    TemplateOutput { section: String },
}

impl Directive {
    /// The tag name used in instruction documents.
    pub fn tag(&self) -> &'static str {
        match self {
            Directive::Action { .. } => "action",
            Directive::Ask { .. } => "ask",
            Directive::Check { .. } => "check",
            Directive::Goto { .. } => "goto",
            Directive::InvokeWorkflow { .. } => "invoke-workflow",
            Directive::InvokeTask { .. } => "invoke-task",
            Directive::TemplateOutput { .. } => "template-output",
        }
    }
}

/// An inline `name=value` assignment on an action directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Dotted variable path.
    pub name: String,
    pub value: Value,
}

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        }
    }

    /// Completed and errored runs do not advance without operator action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Error)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded by a checkpoint. There is no in-progress state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Completed,
    Failed,
    Skipped,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::Completed => "completed",
            CheckpointStatus::Failed => "failed",
            CheckpointStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Immutable snapshot taken after a step finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// 1-based, strictly increasing within a run.
    pub sequence: u64,
    /// The step this checkpoint records.
    pub step_index: usize,
    /// Where execution continues when resuming from this checkpoint.
    pub next_step: usize,
    pub status: CheckpointStatus,
    /// True when `next_step` was set by a goto directive.
    #[serde(default)]
    pub jump: bool,
    /// Skip reason or failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Variable bag at the instant the step finished.
    pub variables: Variables,
    pub recorded_at: DateTime<Utc>,
}

/// Why a run ended in `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub step_index: usize,
    pub error_type: ErrorType,
    pub category: ErrorCategory,
    pub message: String,
    /// Sequence of the most recent non-failed checkpoint, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_good_checkpoint: Option<u64>,
}

// ---------------------------------------------------------------------------
// WorkflowRun
// ---------------------------------------------------------------------------

/// The mutable execution context of one workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// UUIDv7 run ID.
    pub id: Uuid,
    pub project_id: String,
    /// Name of the workflow definition being executed.
    pub workflow: String,
    /// 0-based index of the next step to execute.
    pub current_step: usize,
    pub status: RunStatus,
    pub variables: Variables,
    /// Append-only audit trail of agent invocations.
    #[serde(default)]
    pub activities: Vec<AgentActivity>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Append-only, ordered by `sequence`.
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    /// Number of step executions so far (loop guard input).
    #[serde(default)]
    pub steps_executed: u32,
    /// Pending escalation while the run is paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationRecord>,
    /// Set when the run transitions to `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
}

impl WorkflowRun {
    /// Create a fresh `pending` run positioned at step 0.
    pub fn new(project_id: impl Into<String>, workflow: impl Into<String>, variables: Variables) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            project_id: project_id.into(),
            workflow: workflow.into(),
            current_step: 0,
            status: RunStatus::Pending,
            variables,
            activities: Vec::new(),
            started_at: now,
            updated_at: now,
            checkpoints: Vec::new(),
            steps_executed: 0,
            escalation: None,
            failure: None,
        }
    }

    pub fn latest_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }

    /// The most recent checkpoint whose step did not fail.
    pub fn last_good_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints
            .iter()
            .rev()
            .find(|cp| cp.status != CheckpointStatus::Failed)
    }

    /// Append a checkpoint capturing the current variables.
    ///
    /// Returns the new checkpoint's sequence number.
    pub fn record_checkpoint(
        &mut self,
        step_index: usize,
        next_step: usize,
        status: CheckpointStatus,
        jump: bool,
        note: Option<String>,
    ) -> u64 {
        let sequence = self.latest_checkpoint().map_or(1, |cp| cp.sequence + 1);
        let now = Utc::now();
        self.checkpoints.push(Checkpoint {
            sequence,
            step_index,
            next_step,
            status,
            jump,
            note,
            variables: self.variables.clone(),
            recorded_at: now,
        });
        self.updated_at = now;
        sequence
    }

    /// Restore `current_step` and variables from the latest checkpoint.
    ///
    /// Returns `false` when the run has no checkpoints (fresh run).
    pub fn rehydrate(&mut self) -> bool {
        let Some(latest) = self.checkpoints.last() else {
            return false;
        };
        self.current_step = latest.next_step;
        self.variables = latest.variables.clone();
        true
    }

    /// Total estimated agent spend for this run.
    pub fn total_cost_usd(&self) -> f64 {
        self.activities.iter().map(|a| a.estimated_cost_usd).sum()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_checkpoint_assigns_increasing_sequence() {
        let mut run = WorkflowRun::new("proj", "wf", Variables::new());
        let first = run.record_checkpoint(0, 1, CheckpointStatus::Completed, false, None);
        let second = run.record_checkpoint(1, 2, CheckpointStatus::Skipped, false, None);
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(run.latest_checkpoint().unwrap().status, CheckpointStatus::Skipped);
    }

    #[test]
    fn checkpoint_snapshots_variables_at_record_time() {
        let mut run = WorkflowRun::new("proj", "wf", Variables::new());
        run.variables.set("x", json!(1));
        run.record_checkpoint(0, 1, CheckpointStatus::Completed, false, None);
        run.variables.set("x", json!(2));

        assert_eq!(run.checkpoints[0].variables.get("x"), Some(&json!(1)));
    }

    #[test]
    fn rehydrate_restores_resume_point_and_variables() {
        let mut run = WorkflowRun::new("proj", "wf", Variables::new());
        run.variables.set("x", json!("saved"));
        run.record_checkpoint(2, 3, CheckpointStatus::Completed, false, None);

        run.variables.set("x", json!("dirty"));
        run.current_step = 0;

        assert!(run.rehydrate());
        assert_eq!(run.current_step, 3);
        assert_eq!(run.variables.get("x"), Some(&json!("saved")));
    }

    #[test]
    fn rehydrate_on_fresh_run_is_noop() {
        let mut run = WorkflowRun::new("proj", "wf", Variables::new());
        assert!(!run.rehydrate());
        assert_eq!(run.current_step, 0);
    }

    #[test]
    fn last_good_checkpoint_skips_failures() {
        let mut run = WorkflowRun::new("proj", "wf", Variables::new());
        run.record_checkpoint(0, 1, CheckpointStatus::Completed, false, None);
        run.record_checkpoint(1, 1, CheckpointStatus::Failed, false, Some("boom".into()));
        assert_eq!(run.last_good_checkpoint().unwrap().sequence, 1);
    }

    #[test]
    fn directive_serde_uses_type_tag() {
        let directive = Directive::Ask {
            agent: "analyst".to_string(),
            prompt: "Summarise".to_string(),
            store_as: "summary".to_string(),
        };
        let value = serde_json::to_value(&directive).unwrap();
        assert_eq!(value["type"], "ask");
        assert_eq!(directive.tag(), "ask");

        let parsed: Directive = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, directive);
    }

    #[test]
    fn definition_parses_from_yaml_with_defaults() {
        let yaml = r#"
name: create-prd
instructions: instructions.md
variables:
  inputs:
    clarity: high
"#;
        let def: WorkflowDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(def.name, "create-prd");
        assert!(def.template.is_none());
        assert_eq!(def.variables["inputs"], json!({ "clarity": "high" }));
    }

    #[test]
    fn run_status_display_and_terminal() {
        assert_eq!(RunStatus::Paused.to_string(), "paused");
        assert!(RunStatus::Error.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
    }
}
