//! Engine collaborator ports.
//!
//! The engine delegates everything outside step sequencing: side-effecting
//! actions, template rendering and loading nested workflows. Each port is
//! object-safe so an engine can be assembled from trait objects at runtime.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use cadence_types::error::{ErrorCategory, WorkflowError};
use cadence_types::variables::Variables;
use thiserror::Error;
use uuid::Uuid;

use crate::error::Classified;

use super::definition::{LoadedWorkflow, load_task_file, load_workflow_file};

/// Boxed future returned by the collaborator ports.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollaboratorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("{0}")]
    Failed(String),
}

impl Classified for CollaboratorError {
    fn category(&self) -> ErrorCategory {
        match self {
            CollaboratorError::NotFound(_) => ErrorCategory::NotFound,
            CollaboratorError::Timeout(_) => ErrorCategory::Timeout,
            CollaboratorError::Io(_) => ErrorCategory::Io,
            CollaboratorError::Invalid(_) => ErrorCategory::MalformedInput,
            CollaboratorError::Failed(_) => ErrorCategory::Unknown,
        }
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// An `action` directive, resolved against the step's variables.
#[derive(Debug, Clone)]
pub struct ActionRequest<'a> {
    pub run_id: Uuid,
    pub project_id: &'a str,
    pub workflow: &'a str,
    pub step_index: usize,
    /// Action text with `{{ }}` references already substituted.
    pub text: String,
    pub variables: &'a Variables,
}

/// Performs side-effecting actions on behalf of the engine.
pub trait ActionRunner: Send + Sync {
    /// Run the action. Returned variables are merged into the step scope.
    fn run<'a>(&'a self, request: ActionRequest<'a>) -> BoxFuture<'a, Result<Variables, CollaboratorError>>;
}

/// Logs the action and changes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopActionRunner;

impl ActionRunner for NoopActionRunner {
    fn run<'a>(&'a self, request: ActionRequest<'a>) -> BoxFuture<'a, Result<Variables, CollaboratorError>> {
        Box::pin(async move {
            tracing::info!(
                run_id = %request.run_id,
                step = request.step_index + 1,
                "action: {}",
                request.text
            );
            Ok(Variables::new())
        })
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// A `template-output` directive.
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    pub run_id: Uuid,
    pub project_id: &'a str,
    pub workflow: &'a LoadedWorkflow,
    pub section: &'a str,
    pub variables: &'a Variables,
}

/// Renders template sections from the run's variables.
pub trait TemplateRenderer: Send + Sync {
    fn render<'a>(&'a self, request: RenderRequest<'a>) -> BoxFuture<'a, Result<String, CollaboratorError>>;
}

/// Renders a section as the section's variable value, or empty text.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTemplateRenderer;

impl TemplateRenderer for NoopTemplateRenderer {
    fn render<'a>(&'a self, request: RenderRequest<'a>) -> BoxFuture<'a, Result<String, CollaboratorError>> {
        Box::pin(async move {
            Ok(request
                .variables
                .get(request.section)
                .map(super::template::value_to_string)
                .unwrap_or_default())
        })
    }
}

// ---------------------------------------------------------------------------
// Nested workflow loading
// ---------------------------------------------------------------------------

/// Loads definitions referenced by `invoke-workflow` and `invoke-task`.
pub trait WorkflowLoader: Send + Sync {
    fn load_workflow<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<LoadedWorkflow, WorkflowError>>;

    fn load_task<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<LoadedWorkflow, WorkflowError>>;
}

/// Reads definitions from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsWorkflowLoader;

impl WorkflowLoader for FsWorkflowLoader {
    fn load_workflow<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<LoadedWorkflow, WorkflowError>> {
        Box::pin(async move { load_workflow_file(path) })
    }

    fn load_task<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<LoadedWorkflow, WorkflowError>> {
        Box::pin(async move { load_task_file(path) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collaborator_error_categories() {
        assert_eq!(CollaboratorError::Io("disk".into()).category(), ErrorCategory::Io);
        assert_eq!(
            CollaboratorError::NotFound("x".into()).category(),
            ErrorCategory::NotFound
        );
        assert_eq!(CollaboratorError::Failed("x".into()).category(), ErrorCategory::Unknown);
    }

    #[tokio::test]
    async fn noop_runner_returns_no_variables() {
        let vars = Variables::new();
        let out = NoopActionRunner
            .run(ActionRequest {
                run_id: Uuid::now_v7(),
                project_id: "proj",
                workflow: "wf",
                step_index: 0,
                text: "Create the branch".into(),
                variables: &vars,
            })
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn fs_loader_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.md");
        let err = FsWorkflowLoader.load_task(&path).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn noop_renderer_echoes_section_variable() {
        let workflow = LoadedWorkflow::from_document(
            cadence_types::workflow::WorkflowDefinition {
                name: "wf".into(),
                description: None,
                instructions: "steps.md".into(),
                template: None,
                default_output: None,
                variables: Default::default(),
            },
            r#"<step n="1" goal="Only">Do it.</step>"#,
            ".",
        )
        .unwrap();
        let mut vars = Variables::new();
        vars.set("overview", json!("text"));

        let rendered = NoopTemplateRenderer
            .render(RenderRequest {
                run_id: Uuid::now_v7(),
                project_id: "proj",
                workflow: &workflow,
                section: "overview",
                variables: &vars,
            })
            .await
            .unwrap();
        assert_eq!(rendered, "text");
    }
}
