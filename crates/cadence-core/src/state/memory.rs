//! In-memory state store for embedding and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use cadence_types::state::{PhaseSummary, TaskStatus};
use cadence_types::workflow::WorkflowRun;
use tokio::sync::RwLock;

use super::projection::{phase_summary, task_status};
use super::store::{StateDocument, StateError, StateStore};

/// Keeps each project's latest run in memory.
///
/// Runs pass through the same `StateDocument` validation the file store
/// applies on load, so ordering bugs surface in tests too.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    runs: RwLock<HashMap<String, WorkflowRun>>,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save_checkpoint` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl StateStore for MemoryStateStore {
    async fn save_checkpoint(&self, run: &WorkflowRun) -> Result<(), StateError> {
        StateDocument::new(run).validate(&run.project_id)?;
        self.runs
            .write()
            .await
            .insert(run.project_id.clone(), run.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_latest(&self, project_id: &str) -> Result<WorkflowRun, StateError> {
        self.runs
            .read()
            .await
            .get(project_id)
            .cloned()
            .ok_or_else(|| StateError::NotFound(project_id.to_string()))
    }

    async fn query_phase(&self, project_id: &str) -> Result<PhaseSummary, StateError> {
        let runs = self.runs.read().await;
        let run = runs
            .get(project_id)
            .ok_or_else(|| StateError::NotFound(project_id.to_string()))?;
        Ok(phase_summary(run))
    }

    async fn query_task_status(
        &self,
        project_id: &str,
        task_id: &str,
    ) -> Result<TaskStatus, StateError> {
        let runs = self.runs.read().await;
        let run = runs
            .get(project_id)
            .ok_or_else(|| StateError::NotFound(project_id.to_string()))?;
        task_status(run, task_id).ok_or_else(|| StateError::TaskNotFound {
            project_id: project_id.to_string(),
            task: task_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::variables::Variables;
    use cadence_types::workflow::CheckpointStatus;

    #[tokio::test]
    async fn save_then_load_returns_latest() {
        let store = MemoryStateStore::new();
        let mut run = WorkflowRun::new("proj", "wf", Variables::new());
        run.record_checkpoint(0, 1, CheckpointStatus::Completed, false, None);
        store.save_checkpoint(&run).await.unwrap();
        run.record_checkpoint(1, 2, CheckpointStatus::Completed, false, None);
        store.save_checkpoint(&run).await.unwrap();

        let loaded = store.load_latest("proj").await.unwrap();
        assert_eq!(loaded.checkpoints.len(), 2);
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.query_phase("proj").await.unwrap().checkpoints, 2);
    }

    #[tokio::test]
    async fn unknown_project_and_task() {
        let store = MemoryStateStore::new();
        assert_eq!(
            store.load_latest("nope").await.unwrap_err(),
            StateError::NotFound("nope".into())
        );

        let run = WorkflowRun::new("proj", "wf", Variables::new());
        store.save_checkpoint(&run).await.unwrap();
        let err = store.query_task_status("proj", "42").await.unwrap_err();
        assert!(matches!(err, StateError::TaskNotFound { .. }));
    }

    #[tokio::test]
    async fn rejects_non_monotonic_checkpoints() {
        let store = MemoryStateStore::new();
        let mut run = WorkflowRun::new("proj", "wf", Variables::new());
        run.record_checkpoint(0, 1, CheckpointStatus::Completed, false, None);
        run.record_checkpoint(1, 2, CheckpointStatus::Completed, false, None);
        run.checkpoints[1].sequence = 1;

        let err = store.save_checkpoint(&run).await.unwrap_err();
        assert!(matches!(err, StateError::SchemaInvalid { .. }));
    }
}
