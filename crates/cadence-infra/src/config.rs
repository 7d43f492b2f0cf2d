//! Project configuration loader for Cadence.
//!
//! Reads `cadence.toml` from the project directory and deserializes it into
//! [`ProjectConfig`]. Falls back to defaults when the file is missing or
//! malformed. Relative paths in the file resolve against the project
//! directory.

use std::path::{Path, PathBuf};

use cadence_core::workflow::LoadedWorkflow;
use cadence_types::config::ProjectConfig;
use cadence_types::error::ConfigError;
use cadence_types::workflow::Directive;

/// Configuration file name inside a project directory.
pub const CONFIG_FILE: &str = "cadence.toml";

/// Read and parse a config file, reporting every failure.
pub async fn read_project_config(path: &Path) -> Result<ProjectConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    toml::from_str::<ProjectConfig>(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Load project configuration from `{project_dir}/cadence.toml`.
///
/// - If the file does not exist, returns [`ProjectConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and
///   returns the default.
///
/// Either way, relative paths are resolved against `project_dir`.
pub async fn load_project_config(project_dir: &Path) -> ProjectConfig {
    let config_path = project_dir.join(CONFIG_FILE);

    let mut config = match tokio::fs::try_exists(&config_path).await {
        Ok(false) => {
            tracing::debug!(
                "No {CONFIG_FILE} found at {}, using defaults",
                config_path.display()
            );
            ProjectConfig::default()
        }
        _ => match read_project_config(&config_path).await {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("{err}, using defaults");
                ProjectConfig::default()
            }
        },
    };

    resolve_relative_paths(&mut config, project_dir);
    config
}

fn resolve_relative_paths(config: &mut ProjectConfig, project_dir: &Path) {
    let resolve = |path: &Path| -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            project_dir.join(path)
        }
    };
    config.personas_dir = resolve(&config.personas_dir);
    config.onboarding_docs = config.onboarding_docs.iter().map(|p| resolve(p)).collect();
    config.state_dir = config.state_dir.as_deref().map(resolve);
}

/// Root directory for per-project state: `state_dir` when configured,
/// otherwise `{data_dir}/projects`.
pub fn resolve_state_root(config: &ProjectConfig, data_dir: &Path) -> PathBuf {
    config
        .state_dir
        .clone()
        .unwrap_or_else(|| data_dir.join("projects"))
}

/// Read the configured onboarding documents.
///
/// Unreadable documents are skipped with a warning; onboarding context is
/// helpful but never required.
pub async fn load_onboarding_docs(config: &ProjectConfig) -> Vec<String> {
    let mut docs = Vec::with_capacity(config.onboarding_docs.len());
    for path in &config.onboarding_docs {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => docs.push(text),
            Err(e) => {
                tracing::warn!(path = %path.display(), "skipping onboarding document: {e}");
            }
        }
    }
    docs
}

/// Check that every agent the workflow asks has a model assignment.
///
/// Run before execution so a missing assignment fails fast instead of
/// escalating mid-run.
pub fn check_agent_assignments(
    config: &ProjectConfig,
    workflow: &LoadedWorkflow,
) -> Result<(), ConfigError> {
    let mut agents = Vec::new();
    for step in &workflow.steps {
        collect_agents(&step.directives, &mut agents);
    }
    match agents.into_iter().find(|agent| config.model_for(agent).is_none()) {
        Some(agent) => Err(ConfigError::MissingAgent(agent.to_string())),
        None => Ok(()),
    }
}

fn collect_agents<'a>(directives: &'a [Directive], out: &mut Vec<&'a str>) {
    for directive in directives {
        match directive {
            Directive::Ask { agent, .. } => out.push(agent),
            Directive::Check { body, .. } => collect_agents(body, out),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use cadence_types::workflow::WorkflowDefinition;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_defaults_with_resolved_paths() {
        let tmp = TempDir::new().unwrap();
        let config = load_project_config(tmp.path()).await;
        assert_eq!(config.project_id, "default");
        assert_eq!(config.kernel.pool_capacity, 4);
        assert_eq!(config.personas_dir, tmp.path().join("agents"));
    }

    #[tokio::test]
    async fn valid_toml_is_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE),
            r#"
project_id = "billing"
onboarding_docs = ["docs/overview.md"]
state_dir = "/var/lib/cadence"

[agents.analyst]
provider = "claude"
model = "claude-sonnet-4"

[kernel]
pool_capacity = 2
loop_guard_multiplier = 3

[kernel.retry]
max_attempts = 5
"#,
        )
        .await
        .unwrap();

        let config = load_project_config(tmp.path()).await;
        assert_eq!(config.project_id, "billing");
        assert_eq!(config.kernel.pool_capacity, 2);
        assert_eq!(config.kernel.loop_guard_multiplier, 3);
        assert_eq!(config.kernel.retry.max_attempts, 5);
        assert_eq!(config.kernel.retry.backoff_ms, vec![1_000, 2_000, 4_000]);
        assert_eq!(config.agents["analyst"].model, "claude-sonnet-4");
        assert_eq!(
            config.onboarding_docs,
            vec![tmp.path().join("docs/overview.md")]
        );
        assert_eq!(config.state_dir, Some(PathBuf::from("/var/lib/cadence")));
    }

    #[tokio::test]
    async fn invalid_toml_returns_defaults() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_project_config(tmp.path()).await;
        assert_eq!(config.project_id, "default");

        let err = read_project_config(&tmp.path().join(CONFIG_FILE))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn state_root_defaults_under_data_dir() {
        let config = ProjectConfig::default();
        assert_eq!(
            resolve_state_root(&config, Path::new("/home/user/.cadence")),
            PathBuf::from("/home/user/.cadence/projects")
        );

        let config = ProjectConfig {
            state_dir: Some(PathBuf::from("/srv/state")),
            ..ProjectConfig::default()
        };
        assert_eq!(
            resolve_state_root(&config, Path::new("/ignored")),
            PathBuf::from("/srv/state")
        );
    }

    #[tokio::test]
    async fn onboarding_docs_skip_unreadable_files() {
        let tmp = TempDir::new().unwrap();
        let present = tmp.path().join("overview.md");
        tokio::fs::write(&present, "# Overview").await.unwrap();
        let config = ProjectConfig {
            onboarding_docs: vec![present, tmp.path().join("missing.md")],
            ..ProjectConfig::default()
        };

        assert_eq!(load_onboarding_docs(&config).await, vec!["# Overview".to_string()]);
    }

    #[test]
    fn missing_agent_assignment_is_reported() {
        let definition = WorkflowDefinition {
            name: "review".into(),
            description: None,
            instructions: "review.md".into(),
            template: None,
            default_output: None,
            variables: BTreeMap::new(),
        };
        let workflow = LoadedWorkflow::from_document(
            definition,
            r#"<step n="1" goal="Review">
  <check if="deep">
    <ask agent="auditor">Audit it</ask>
  </check>
</step>"#,
            "/wf",
        )
        .unwrap();

        let err = check_agent_assignments(&ProjectConfig::default(), &workflow).unwrap_err();
        assert!(matches!(err, ConfigError::MissingAgent(agent) if agent == "auditor"));

        let mut config = ProjectConfig::default();
        config.default_model = Some(cadence_types::agent::ModelAssignment {
            provider: "claude".into(),
            model: "claude-sonnet-4".into(),
        });
        assert!(check_agent_assignments(&config, &workflow).is_ok());
    }
}
