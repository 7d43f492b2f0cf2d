//! Best-effort git commits of project state.
//!
//! After each save the state files are committed to the enclosing git
//! repository, giving operators a reviewable history of every checkpoint.
//! Nothing here can fail a save: a missing `git`, a directory outside any
//! repository or a rejected commit is logged and ignored.

use std::path::Path;
use std::time::Duration;

use cadence_types::workflow::WorkflowRun;

/// Upper bound for a single git invocation.
const GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Commits state files with `git` via `tokio::process`.
#[derive(Debug, Clone)]
pub struct GitCommitter {
    program: String,
}

impl GitCommitter {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    /// Use a different git executable.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `cadence(<project>): step 3 completed [running]`
    pub fn commit_message(run: &WorkflowRun) -> String {
        match run.latest_checkpoint() {
            Some(cp) => format!(
                "cadence({}): step {} {} [{}]",
                run.project_id,
                cp.step_index + 1,
                cp.status,
                run.status
            ),
            None => format!("cadence({}): {} [{}]", run.project_id, run.workflow, run.status),
        }
    }

    /// Stage and commit `files` (relative to `dir`). Returns whether a
    /// commit was made.
    pub async fn commit(&self, dir: &Path, files: &[&str], run: &WorkflowRun) -> bool {
        if let Err(e) = self.git(dir, &["rev-parse", "--is-inside-work-tree"]).await {
            tracing::debug!(dir = %dir.display(), "state directory is not in a git repository: {e}");
            return false;
        }

        let mut add = vec!["add", "--"];
        add.extend_from_slice(files);
        if let Err(e) = self.git(dir, &add).await {
            tracing::warn!(dir = %dir.display(), "git add failed: {e}");
            return false;
        }

        let message = Self::commit_message(run);
        let mut commit = vec!["commit", "--quiet", "-m", message.as_str(), "--"];
        commit.extend_from_slice(files);
        match self.git(dir, &commit).await {
            Ok(_) => {
                tracing::debug!(run_id = %run.id, "committed state: {message}");
                true
            }
            Err(e) => {
                tracing::warn!(run_id = %run.id, "git commit failed: {e}");
                false
            }
        }
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<String, String> {
        let output = tokio::time::timeout(
            GIT_TIMEOUT,
            tokio::process::Command::new(&self.program)
                .args(args)
                .current_dir(dir)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| format!("timed out after {}s", GIT_TIMEOUT.as_secs()))?
        .map_err(|e| format!("failed to run {}: {e}", self.program))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() { stdout } else { stderr };
            Err(format!("exited with {}: {}", output.status, detail.trim()))
        }
    }
}

impl Default for GitCommitter {
    fn default() -> Self {
        Self::new()
    }
}
