//! Project configuration types for Cadence.
//!
//! `ProjectConfig` represents a project's `cadence.toml`: agent model
//! assignments, kernel limits, pricing overrides and provider commands.
//! All fields have sensible defaults.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::{ModelAssignment, ModelPricing};

/// Top-level configuration for one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Unique project identifier; also the state directory name.
    #[serde(default = "default_project_id")]
    pub project_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Per-agent model assignment.
    #[serde(default)]
    pub agents: BTreeMap<String, ModelAssignment>,

    /// Used for agents without an explicit assignment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<ModelAssignment>,

    /// Documents injected into every agent invocation's context.
    #[serde(default)]
    pub onboarding_docs: Vec<PathBuf>,

    #[serde(default = "default_personas_dir")]
    pub personas_dir: PathBuf,

    /// Root of per-project state directories. Defaults to the data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    #[serde(default)]
    pub kernel: KernelConfig,

    /// Pricing overrides consulted before the built-in table.
    #[serde(default)]
    pub pricing: Vec<ModelPricing>,

    /// Command used to reach each provider.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderCommand>,
}

fn default_project_id() -> String {
    "default".to_string()
}

fn default_personas_dir() -> PathBuf {
    PathBuf::from("agents")
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project_id: default_project_id(),
            name: None,
            agents: BTreeMap::new(),
            default_model: None,
            onboarding_docs: Vec::new(),
            personas_dir: default_personas_dir(),
            state_dir: None,
            kernel: KernelConfig::default(),
            pricing: Vec::new(),
            providers: BTreeMap::new(),
        }
    }
}

impl ProjectConfig {
    /// Model assignment for an agent, falling back to `default_model`.
    pub fn model_for(&self, agent: &str) -> Option<&ModelAssignment> {
        self.agents.get(agent).or(self.default_model.as_ref())
    }
}

/// Kernel limits and policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Maximum concurrent agent invocations.
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,

    /// Upper bound on releasing an agent handle.
    #[serde(default = "default_release_timeout_ms")]
    pub release_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Step executions allowed per step in the workflow before the loop guard trips.
    #[serde(default = "default_loop_guard_multiplier")]
    pub loop_guard_multiplier: u32,

    #[serde(default = "default_max_sub_workflow_depth")]
    pub max_sub_workflow_depth: usize,

    /// Prompts longer than this are truncated before dispatch.
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,

    /// Per-project spend ceiling in USD. Unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_usd: Option<f64>,

    /// Commit the state directory after each checkpoint.
    #[serde(default = "default_git_commit")]
    pub git_commit: bool,
}

fn default_pool_capacity() -> usize {
    4
}

fn default_release_timeout_ms() -> u64 {
    5_000
}

fn default_loop_guard_multiplier() -> u32 {
    10
}

fn default_max_sub_workflow_depth() -> usize {
    5
}

fn default_max_prompt_chars() -> usize {
    200_000
}

fn default_git_commit() -> bool {
    true
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            pool_capacity: default_pool_capacity(),
            release_timeout_ms: default_release_timeout_ms(),
            retry: RetryPolicy::default(),
            loop_guard_multiplier: default_loop_guard_multiplier(),
            max_sub_workflow_depth: default_max_sub_workflow_depth(),
            max_prompt_chars: default_max_prompt_chars(),
            budget_usd: None,
            git_commit: default_git_commit(),
        }
    }
}

impl KernelConfig {
    pub fn release_timeout(&self) -> Duration {
        Duration::from_millis(self.release_timeout_ms)
    }
}

/// Retry policy for retryable failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before each retry. The last entry is reused when exhausted.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> Vec<u64> {
    vec![1_000, 2_000, 4_000]
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: Vec::new(),
        }
    }

    /// Delay before retry number `retry` (0-based: the first retry is 0).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let ms = self
            .backoff_ms
            .get(retry as usize)
            .or(self.backoff_ms.last())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(ms)
    }
}

/// How to launch a provider's command-line client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider_timeout_secs() -> u64 {
    600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_config_deserialize_with_defaults() {
        let config: ProjectConfig = toml::from_str("").unwrap();
        assert_eq!(config.project_id, "default");
        assert_eq!(config.kernel.pool_capacity, 4);
        assert_eq!(config.kernel.release_timeout_ms, 5_000);
        assert_eq!(config.kernel.retry.max_attempts, 3);
        assert_eq!(config.kernel.loop_guard_multiplier, 10);
        assert_eq!(config.kernel.max_sub_workflow_depth, 5);
        assert!(config.kernel.git_commit);
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_project_config_deserialize_with_values() {
        let toml_str = r#"
project_id = "shop"
name = "Shop rewrite"
onboarding_docs = ["docs/architecture.md"]

[default_model]
provider = "claude"
model = "claude-haiku-4"

[agents.analyst]
provider = "claude"
model = "claude-sonnet-4"

[kernel]
pool_capacity = 2
budget_usd = 12.5

[kernel.retry]
max_attempts = 5
backoff_ms = [100, 200]

[[pricing]]
provider = "claude"
model_pattern = "claude-sonnet"
input_cost_per_million = 3.0
output_cost_per_million = 15.0

[providers.claude]
program = "claude"
args = ["--print"]
"#;
        let config: ProjectConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.project_id, "shop");
        assert_eq!(config.kernel.pool_capacity, 2);
        assert_eq!(config.kernel.budget_usd, Some(12.5));
        assert_eq!(config.kernel.retry.max_attempts, 5);
        assert_eq!(config.model_for("analyst").unwrap().model, "claude-sonnet-4");
        assert_eq!(config.model_for("dev").unwrap().model, "claude-haiku-4");
        assert_eq!(config.providers["claude"].timeout_secs, 600);
        assert_eq!(config.pricing.len(), 1);
    }

    #[test]
    fn test_model_for_without_default() {
        let config = ProjectConfig::default();
        assert!(config.model_for("analyst").is_none());
    }

    #[test]
    fn test_retry_delay_reuses_last_entry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(7), Duration::from_secs(4));
        assert_eq!(RetryPolicy::none().delay_for(0), Duration::ZERO);
    }
}
