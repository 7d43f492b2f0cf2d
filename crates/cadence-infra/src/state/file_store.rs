//! File-backed `StateStore`.
//!
//! Layout under the state root:
//!
//! ```text
//! <root>/<project_id>/state.json   versioned StateDocument
//! <root>/<project_id>/STATUS.md    narrative status for humans
//! ```
//!
//! Both files are replaced atomically on every save. Status queries read the
//! summary header and the stored run; nothing is replayed.

use std::path::{Path, PathBuf};

use cadence_core::state::{StateDocument, StateError, StateStore, render_status, task_status};
use cadence_types::state::{PhaseSummary, TaskStatus};
use cadence_types::workflow::WorkflowRun;

use crate::filesystem::write_atomic;

use super::git::GitCommitter;

pub const STATE_FILE: &str = "state.json";
pub const STATUS_FILE: &str = "STATUS.md";

/// Durable per-project state in plain files.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
    git: Option<GitCommitter>,
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            git: None,
        }
    }

    /// Commit state files to git after every save.
    pub fn with_git(mut self, committer: GitCommitter) -> Self {
        self.git = Some(committer);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{project_id}/`
    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id)
    }

    pub fn state_path(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join(STATE_FILE)
    }

    pub fn status_path(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join(STATUS_FILE)
    }

    async fn read_document(&self, project_id: &str) -> Result<StateDocument, StateError> {
        let path = self.state_path(project_id);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StateError::NotFound(project_id.to_string()));
            }
            Err(e) => {
                return Err(StateError::Io(format!("{}: {e}", path.display())));
            }
        };
        StateDocument::from_json(project_id, &text)
    }
}

impl StateStore for FileStateStore {
    async fn save_checkpoint(&self, run: &WorkflowRun) -> Result<(), StateError> {
        let document = StateDocument::new(run);
        document.validate(&run.project_id)?;
        let json = document.to_json()?;

        let state_path = self.state_path(&run.project_id);
        write_atomic(&state_path, json.as_bytes())
            .await
            .map_err(|e| StateError::Io(format!("{}: {e}", state_path.display())))?;

        let status_path = self.status_path(&run.project_id);
        write_atomic(&status_path, render_status(run).as_bytes())
            .await
            .map_err(|e| StateError::Io(format!("{}: {e}", status_path.display())))?;

        tracing::debug!(
            run_id = %run.id,
            project_id = %run.project_id,
            checkpoints = run.checkpoints.len(),
            status = %run.status,
            "state saved"
        );

        if let Some(git) = &self.git {
            git.commit(&self.project_dir(&run.project_id), &[STATE_FILE, STATUS_FILE], run)
                .await;
        }
        Ok(())
    }

    async fn load_latest(&self, project_id: &str) -> Result<WorkflowRun, StateError> {
        Ok(self.read_document(project_id).await?.run)
    }

    async fn query_phase(&self, project_id: &str) -> Result<PhaseSummary, StateError> {
        Ok(self.read_document(project_id).await?.summary)
    }

    async fn query_task_status(
        &self,
        project_id: &str,
        task_id: &str,
    ) -> Result<TaskStatus, StateError> {
        let document = self.read_document(project_id).await?;
        task_status(&document.run, task_id).ok_or_else(|| StateError::TaskNotFound {
            project_id: project_id.to_string(),
            task: task_id.to_string(),
        })
    }
}
