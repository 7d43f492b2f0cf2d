//! JSON-lines escalation queue.
//!
//! Each escalation is appended as one JSON object per line to
//! `<root>/<project_id>/escalations.jsonl`, next to the project's state. An
//! operator (or a notifier tailing the file) picks questions up from there.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use cadence_core::error::{EscalationError, EscalationSink};
use cadence_types::escalation::EscalationRecord;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const ESCALATIONS_FILE: &str = "escalations.jsonl";

/// Appends escalation records to per-project JSONL files.
#[derive(Debug)]
pub struct JsonlEscalationQueue {
    root: PathBuf,
    /// Serializes appends so concurrent runs never interleave lines.
    write_lock: Mutex<()>,
}

impl JsonlEscalationQueue {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn queue_path(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id).join(ESCALATIONS_FILE)
    }

    /// All records queued for a project, oldest first.
    ///
    /// Lines that fail to parse are skipped with a warning.
    pub async fn records(&self, project_id: &str) -> Result<Vec<EscalationRecord>, EscalationError> {
        let path = self.queue_path(project_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(EscalationError::Unavailable(format!(
                    "{}: {e}",
                    path.display()
                )));
            }
        };

        let mut records = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EscalationRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    line = number + 1,
                    "skipping malformed escalation: {e}"
                ),
            }
        }
        Ok(records)
    }
}

impl EscalationSink for JsonlEscalationQueue {
    fn submit<'a>(
        &'a self,
        record: &'a EscalationRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), EscalationError>> + Send + 'a>> {
        Box::pin(async move {
            let mut line = serde_json::to_string(record)
                .map_err(|e| EscalationError::Serialization(e.to_string()))?;
            line.push('\n');

            let path = self.queue_path(&record.project_id);
            let unavailable =
                |e: std::io::Error| EscalationError::Unavailable(format!("{}: {e}", path.display()));

            let _guard = self.write_lock.lock().await;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(unavailable)?;
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(unavailable)?;
            file.write_all(line.as_bytes()).await.map_err(unavailable)?;
            file.sync_data().await.map_err(unavailable)?;

            tracing::info!(
                escalation_id = %record.id,
                path = %path.display(),
                "escalation queued"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn record(project: &str, question: &str) -> EscalationRecord {
        EscalationRecord::new(
            project,
            Uuid::now_v7(),
            1,
            question,
            "condition is false",
            json!({ "category": "validation" }),
        )
    }

    #[tokio::test]
    async fn records_are_appended_per_project() {
        let dir = tempdir().unwrap();
        let queue = JsonlEscalationQueue::new(dir.path());

        queue.submit(&record("billing", "First?")).await.unwrap();
        queue.submit(&record("billing", "Second?")).await.unwrap();
        queue.submit(&record("search", "Other?")).await.unwrap();

        let billing = queue.records("billing").await.unwrap();
        assert_eq!(
            billing.iter().map(|r| r.question.as_str()).collect::<Vec<_>>(),
            vec!["First?", "Second?"]
        );
        assert_eq!(queue.records("search").await.unwrap().len(), 1);
        assert!(queue.records("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let queue = JsonlEscalationQueue::new(dir.path());
        queue.submit(&record("billing", "Kept?")).await.unwrap();

        let path = queue.queue_path("billing");
        let mut content = tokio::fs::read_to_string(&path).await.unwrap();
        content.push_str("{ truncated\n");
        tokio::fs::write(&path, content).await.unwrap();

        let records = queue.records("billing").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].question, "Kept?");
    }
}
