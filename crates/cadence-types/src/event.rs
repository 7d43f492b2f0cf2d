//! Event types for the Cadence kernel event bus.
//!
//! `KernelEvent` is broadcast during run execution. All variants are
//! Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCategory, ErrorType, Severity};
use crate::workflow::CheckpointStatus;

/// Events emitted while the kernel executes workflow runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelEvent {
    RunStarted {
        run_id: Uuid,
        project_id: String,
        workflow: String,
        step_count: usize,
    },

    StepCompleted {
        run_id: Uuid,
        step_index: usize,
        next_step: usize,
    },

    StepSkipped {
        run_id: Uuid,
        step_index: usize,
        reason: String,
    },

    StepFailed {
        run_id: Uuid,
        step_index: usize,
        error_type: ErrorType,
        error: String,
    },

    CheckpointSaved {
        run_id: Uuid,
        sequence: u64,
        status: CheckpointStatus,
    },

    /// An agent invocation finished (successfully or not).
    AgentInvoked {
        task_id: Uuid,
        agent: String,
        model: String,
        duration_ms: u64,
        estimated_cost_usd: f64,
        success: bool,
    },

    EscalationRaised {
        escalation_id: Uuid,
        run_id: Uuid,
        step_index: usize,
        question: String,
    },

    RunPaused { run_id: Uuid, step_index: usize },

    RunCompleted {
        run_id: Uuid,
        steps_executed: u32,
        total_cost_usd: f64,
    },

    RunFailed {
        run_id: Uuid,
        step_index: usize,
        error: String,
    },

    /// A failure that must reach an operator even though the run continues.
    CriticalFailure {
        project_id: Option<String>,
        operation: String,
        category: ErrorCategory,
        severity: Severity,
        message: String,
    },
}

impl KernelEvent {
    /// Run this event belongs to, if any.
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            KernelEvent::RunStarted { run_id, .. }
            | KernelEvent::StepCompleted { run_id, .. }
            | KernelEvent::StepSkipped { run_id, .. }
            | KernelEvent::StepFailed { run_id, .. }
            | KernelEvent::CheckpointSaved { run_id, .. }
            | KernelEvent::EscalationRaised { run_id, .. }
            | KernelEvent::RunPaused { run_id, .. }
            | KernelEvent::RunCompleted { run_id, .. }
            | KernelEvent::RunFailed { run_id, .. } => Some(*run_id),
            KernelEvent::AgentInvoked { .. } | KernelEvent::CriticalFailure { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_type_tag() {
        let run_id = Uuid::now_v7();
        let event = KernelEvent::RunPaused { run_id, step_index: 2 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "run_paused");
        assert_eq!(json["step_index"], 2);
        assert_eq!(event.run_id(), Some(run_id));
    }

    #[test]
    fn critical_failure_has_no_run() {
        let event = KernelEvent::CriticalFailure {
            project_id: Some("p".into()),
            operation: "save_checkpoint".into(),
            category: ErrorCategory::Io,
            severity: Severity::Critical,
            message: "disk full".into(),
        };
        assert!(event.run_id().is_none());
    }
}
