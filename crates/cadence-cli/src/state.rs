//! Application state wiring the kernel to its infrastructure.
//!
//! The engine is generic over its state store; `AppState` pins it to the
//! file store and plugs in the command-line model clients, filesystem
//! personas, the JSONL escalation queue and the file template renderer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use cadence_core::agent::AgentPool;
use cadence_core::event::EventBus;
use cadence_core::workflow::WorkflowEngine;
use cadence_infra::config::{load_onboarding_docs, load_project_config, resolve_state_root};
use cadence_infra::escalation::JsonlEscalationQueue;
use cadence_infra::filesystem::resolve_data_dir;
use cadence_infra::model::CommandClientFactory;
use cadence_infra::persona::FsPersonaSource;
use cadence_infra::state::{FileStateStore, GitCommitter};
use cadence_infra::template::FileTemplateRenderer;
use cadence_types::config::ProjectConfig;

pub type ConcreteEngine = WorkflowEngine<FileStateStore>;

/// Shared state for command handlers.
pub struct AppState {
    pub config: ProjectConfig,
    pub state_root: PathBuf,
    pub escalations: Arc<JsonlEscalationQueue>,
    pub engine: ConcreteEngine,
}

impl AppState {
    /// Load `cadence.toml` from `project_dir` and wire the kernel.
    pub async fn init(project_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let config = load_project_config(project_dir).await;
        let state_root = resolve_state_root(&config, &data_dir);

        let mut store = FileStateStore::new(&state_root);
        if config.kernel.git_commit {
            store = store.with_git(GitCommitter::new());
        }

        let events = EventBus::default();
        let onboarding = load_onboarding_docs(&config).await;
        let pool = AgentPool::new(
            config.clone(),
            Arc::new(CommandClientFactory::new(config.providers.clone())),
            Arc::new(FsPersonaSource::new(config.personas_dir.clone())),
            events.clone(),
        )
        .with_onboarding(onboarding);

        let escalations = Arc::new(JsonlEscalationQueue::new(&state_root));
        let engine = WorkflowEngine::new(
            Arc::new(store),
            Arc::new(pool),
            escalations.clone(),
            events,
        )
        .with_template_renderer(Arc::new(FileTemplateRenderer::new()));

        tracing::debug!(
            project_id = %config.project_id,
            state_root = %state_root.display(),
            "application state initialized"
        );

        Ok(Self {
            config,
            state_root,
            escalations,
            engine,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.config.project_id
    }
}
