//! Read-only projections over persisted run state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::ActivityStatus;
use crate::workflow::{CheckpointStatus, RunStatus};

/// Where a project currently stands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub project_id: String,
    pub run_id: Uuid,
    pub workflow: String,
    pub status: RunStatus,
    /// 0-based index of the next step to execute.
    pub current_step: usize,
    pub checkpoints: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint: Option<CheckpointSummary>,
    pub activities: usize,
    pub total_cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub sequence: u64,
    pub step_index: usize,
    pub status: CheckpointStatus,
    pub recorded_at: DateTime<Utc>,
}

/// Status of one task: either an agent invocation or a workflow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskStatus {
    Agent {
        task_id: Uuid,
        agent: String,
        model: String,
        status: ActivityStatus,
        duration_ms: u64,
        estimated_cost_usd: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Step {
        step_index: usize,
        /// Latest checkpoint status for the step; `None` if never run.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<CheckpointStatus>,
        /// Whether the run is positioned at this step.
        current: bool,
    },
}
