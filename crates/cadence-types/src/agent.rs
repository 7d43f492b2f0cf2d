//! Agent dispatch types for Cadence.
//!
//! `AgentTask` is the unit of dispatchable work; `AgentActivity` is the
//! audit record appended to a run after every invocation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Model/provider pair configured for an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAssignment {
    /// Provider name (e.g. "claude", "codex").
    pub provider: String,
    /// Model identifier passed to the provider.
    pub model: String,
}

impl std::fmt::Display for ModelAssignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Per-million-token pricing for a provider/model pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub provider: String,
    /// Prefix matched against the model identifier.
    pub model_pattern: String,
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
}

/// An agent's persona: specialization text plus named prompt sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPersona {
    pub name: String,
    pub specialization: String,
    #[serde(default)]
    pub sections: BTreeMap<String, String>,
}

impl AgentPersona {
    /// Assemble the system prompt sent ahead of every invocation.
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!("You are {}. {}", self.name, self.specialization.trim());
        for (title, body) in &self.sections {
            prompt.push_str("\n\n## ");
            prompt.push_str(title);
            prompt.push('\n');
            prompt.push_str(body.trim());
        }
        prompt
    }
}

/// A unit of agent work requested by a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    /// UUIDv7 task ID.
    pub id: Uuid,
    pub project_id: String,
    /// Step that requested the work.
    pub step_index: usize,
    pub agent: String,
    pub prompt: String,
    /// Resolved by the pool from project configuration when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelAssignment>,
    pub created_at: DateTime<Utc>,
}

impl AgentTask {
    pub fn new(
        project_id: impl Into<String>,
        step_index: usize,
        agent: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            project_id: project_id.into(),
            step_index,
            agent: agent.into(),
            prompt: prompt.into(),
            model: None,
            created_at: Utc::now(),
        }
    }

    /// Short description used in activity records.
    pub fn describe(&self) -> String {
        let first_line = self.prompt.lines().next().unwrap_or_default().trim();
        let mut summary: String = first_line.chars().take(80).collect();
        if first_line.chars().count() > 80 {
            summary.push_str("...");
        }
        summary
    }
}

/// Terminal status of an agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Succeeded,
    Failed,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Succeeded => "succeeded",
            ActivityStatus::Failed => "failed",
        }
    }
}

/// Historical record of one agent invocation. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentActivity {
    pub task_id: Uuid,
    pub agent: String,
    pub task: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub estimated_cost_usd: f64,
    pub status: ActivityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_includes_sections_in_order() {
        let mut sections = BTreeMap::new();
        sections.insert("Principles".to_string(), "Be precise.".to_string());
        sections.insert("Output".to_string(), "Markdown only.".to_string());
        let persona = AgentPersona {
            name: "Analyst".to_string(),
            specialization: "Requirements analysis.".to_string(),
            sections,
        };

        let prompt = persona.system_prompt();
        assert!(prompt.starts_with("You are Analyst. Requirements analysis."));
        let output_pos = prompt.find("## Output").unwrap();
        let principles_pos = prompt.find("## Principles").unwrap();
        assert!(output_pos < principles_pos);
    }

    #[test]
    fn describe_truncates_long_first_line() {
        let task = AgentTask::new("p", 0, "dev", "x".repeat(100) + "\nsecond line");
        let description = task.describe();
        assert_eq!(description.chars().count(), 83);
        assert!(description.ends_with("..."));
    }

    #[test]
    fn model_assignment_display() {
        let assignment = ModelAssignment {
            provider: "claude".to_string(),
            model: "claude-sonnet-4".to_string(),
        };
        assert_eq!(assignment.to_string(), "claude/claude-sonnet-4");
    }
}
