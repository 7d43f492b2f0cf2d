//! State store trait and the persisted document format.
//!
//! The engine persists the whole `WorkflowRun` after every step. Stores
//! keep exactly one latest state per project (single writer per project)
//! and answer read-only projections without replaying history.

use cadence_types::error::ErrorCategory;
use cadence_types::state::{PhaseSummary, TaskStatus};
use cadence_types::workflow::WorkflowRun;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::Classified;

use super::projection::phase_summary;

/// Version of the `state.json` layout written by this build.
pub const STATE_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error("no saved state for project '{0}'")]
    NotFound(String),

    #[error("state for project '{project_id}' is corrupted: {message}")]
    Corrupted { project_id: String, message: String },

    #[error("state for project '{project_id}' failed schema validation: {message}")]
    SchemaInvalid { project_id: String, message: String },

    #[error("task '{task}' not found in project '{project_id}'")]
    TaskNotFound { project_id: String, task: String },

    #[error("state I/O error: {0}")]
    Io(String),
}

impl Classified for StateError {
    fn category(&self) -> ErrorCategory {
        match self {
            StateError::NotFound(_) | StateError::TaskNotFound { .. } => ErrorCategory::NotFound,
            StateError::Corrupted { .. } => ErrorCategory::MalformedInput,
            StateError::SchemaInvalid { .. } => ErrorCategory::Validation,
            StateError::Io(_) => ErrorCategory::Io,
        }
    }
}

// ---------------------------------------------------------------------------
// StateStore trait
// ---------------------------------------------------------------------------

/// Durable per-project run state.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait StateStore: Send + Sync {
    /// Persist the run as the project's latest state.
    fn save_checkpoint(
        &self,
        run: &WorkflowRun,
    ) -> impl std::future::Future<Output = Result<(), StateError>> + Send;

    /// Load the project's latest run.
    fn load_latest(
        &self,
        project_id: &str,
    ) -> impl std::future::Future<Output = Result<WorkflowRun, StateError>> + Send;

    /// Summary of where the project stands.
    fn query_phase(
        &self,
        project_id: &str,
    ) -> impl std::future::Future<Output = Result<PhaseSummary, StateError>> + Send;

    /// Status of an agent task (UUID) or a workflow step (1-based number).
    fn query_task_status(
        &self,
        project_id: &str,
        task_id: &str,
    ) -> impl std::future::Future<Output = Result<TaskStatus, StateError>> + Send;
}

// ---------------------------------------------------------------------------
// StateDocument
// ---------------------------------------------------------------------------

/// The versioned `state.json` layout: a summary header plus the full run.
///
/// The header lets readers answer status queries without deserializing
/// checkpoint history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    pub schema_version: u32,
    pub summary: PhaseSummary,
    pub run: WorkflowRun,
}

impl StateDocument {
    pub fn new(run: &WorkflowRun) -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            summary: phase_summary(run),
            run: run.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, StateError> {
        serde_json::to_string_pretty(self).map_err(|e| StateError::Corrupted {
            project_id: self.run.project_id.clone(),
            message: format!("failed to serialize state: {e}"),
        })
    }

    /// Parse and validate a stored document for `project_id`.
    ///
    /// Unparseable text is `Corrupted`; a document that parses but has the
    /// wrong version, owner or checkpoint ordering is `SchemaInvalid`.
    pub fn from_json(project_id: &str, text: &str) -> Result<Self, StateError> {
        let value: Value = serde_json::from_str(text).map_err(|e| StateError::Corrupted {
            project_id: project_id.to_string(),
            message: e.to_string(),
        })?;

        let schema_invalid = |message: String| StateError::SchemaInvalid {
            project_id: project_id.to_string(),
            message,
        };

        match value.get("schema_version").and_then(Value::as_u64) {
            Some(v) if v == u64::from(STATE_SCHEMA_VERSION) => {}
            Some(v) => {
                return Err(schema_invalid(format!(
                    "unsupported schema version {v} (expected {STATE_SCHEMA_VERSION})"
                )));
            }
            None => return Err(schema_invalid("missing schema_version".to_string())),
        }

        let document: StateDocument =
            serde_json::from_value(value).map_err(|e| schema_invalid(e.to_string()))?;
        document.validate(project_id)?;
        Ok(document)
    }

    /// Check ownership and checkpoint ordering.
    pub fn validate(&self, project_id: &str) -> Result<(), StateError> {
        let schema_invalid = |message: String| StateError::SchemaInvalid {
            project_id: project_id.to_string(),
            message,
        };

        if self.run.project_id != project_id || self.summary.project_id != project_id {
            return Err(schema_invalid(format!(
                "state belongs to project '{}'",
                self.run.project_id
            )));
        }

        let mut previous = 0;
        for checkpoint in &self.run.checkpoints {
            if checkpoint.sequence <= previous {
                return Err(schema_invalid(format!(
                    "checkpoint sequence {} follows {previous}",
                    checkpoint.sequence
                )));
            }
            previous = checkpoint.sequence;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::variables::Variables;
    use cadence_types::workflow::CheckpointStatus;

    fn run() -> WorkflowRun {
        let mut run = WorkflowRun::new("proj", "wf", Variables::new());
        run.record_checkpoint(0, 1, CheckpointStatus::Completed, false, None);
        run.record_checkpoint(1, 2, CheckpointStatus::Completed, false, None);
        run
    }

    #[test]
    fn document_round_trips_through_json() {
        let doc = StateDocument::new(&run());
        let parsed = StateDocument::from_json("proj", &doc.to_json().unwrap()).unwrap();
        assert_eq!(parsed, doc);
        assert_eq!(parsed.summary.checkpoints, 2);
    }

    #[test]
    fn garbage_is_corrupted() {
        let err = StateDocument::from_json("proj", "{ not json").unwrap_err();
        assert!(matches!(err, StateError::Corrupted { .. }));
        assert_eq!(err.category(), ErrorCategory::MalformedInput);
    }

    #[test]
    fn wrong_version_is_schema_invalid() {
        let mut value = serde_json::to_value(StateDocument::new(&run())).unwrap();
        value["schema_version"] = serde_json::json!(99);
        let err = StateDocument::from_json("proj", &value.to_string()).unwrap_err();
        assert!(matches!(err, StateError::SchemaInvalid { message, .. } if message.contains("99")));
    }

    #[test]
    fn foreign_project_is_schema_invalid() {
        let doc = StateDocument::new(&run());
        let err = StateDocument::from_json("other", &doc.to_json().unwrap()).unwrap_err();
        assert!(matches!(err, StateError::SchemaInvalid { .. }));
    }

    #[test]
    fn non_monotonic_sequence_is_schema_invalid() {
        let mut run = run();
        run.checkpoints[1].sequence = 1;
        let doc = StateDocument::new(&run);
        let err = StateDocument::from_json("proj", &doc.to_json().unwrap()).unwrap_err();
        assert!(matches!(err, StateError::SchemaInvalid { message, .. } if message.contains("sequence")));
    }
}
