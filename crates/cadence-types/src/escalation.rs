//! Escalation records and operator responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::variables::Variables;

/// A question for a human, raised when the kernel cannot proceed alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub id: Uuid,
    pub project_id: String,
    pub run_id: Uuid,
    pub step_index: usize,
    pub question: String,
    pub reasoning: String,
    /// Serialized `ErrorContext` or other supporting data.
    #[serde(default)]
    pub context: Value,
    /// Set when a step's condition gate raised the escalation: the step
    /// index in the escalating run, then the step index inside each nested
    /// run down to the blocked gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_path: Option<Vec<usize>>,
    pub created_at: DateTime<Utc>,
}

impl EscalationRecord {
    pub fn new(
        project_id: impl Into<String>,
        run_id: Uuid,
        step_index: usize,
        question: impl Into<String>,
        reasoning: impl Into<String>,
        context: Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            project_id: project_id.into(),
            run_id,
            step_index,
            question: question.into(),
            reasoning: reasoning.into(),
            context,
            gate_path: None,
            created_at: Utc::now(),
        }
    }
}

/// What the operator wants done with the escalated step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationDecision {
    /// Re-run the escalated step. A blocking condition gate is bypassed
    /// once.
    #[default]
    Proceed,
    /// Record the step as skipped and continue.
    Skip,
    /// End the run in error.
    Abort,
}

impl std::str::FromStr for EscalationDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "proceed" => Ok(EscalationDecision::Proceed),
            "skip" => Ok(EscalationDecision::Skip),
            "abort" => Ok(EscalationDecision::Abort),
            other => Err(format!("unknown escalation decision '{other}'")),
        }
    }
}

/// The operator's answer to an escalation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationResponse {
    pub escalation_id: Uuid,
    #[serde(default)]
    pub answer: String,
    /// Variables merged into the run before it resumes.
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub decision: EscalationDecision,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_parses_case_insensitively() {
        assert_eq!("Skip".parse::<EscalationDecision>().unwrap(), EscalationDecision::Skip);
        assert_eq!("abort".parse::<EscalationDecision>().unwrap(), EscalationDecision::Abort);
        assert!("later".parse::<EscalationDecision>().is_err());
    }

    #[test]
    fn response_defaults_to_proceed() {
        let json = format!(r#"{{"escalation_id":"{}"}}"#, Uuid::now_v7());
        let response: EscalationResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(response.decision, EscalationDecision::Proceed);
        assert!(response.variables.is_empty());
    }

    #[test]
    fn gate_path_is_omitted_unless_a_gate_blocked() {
        let mut record = EscalationRecord::new(
            "proj",
            Uuid::now_v7(),
            2,
            "Continue?",
            "loop guard",
            Value::Null,
        );
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("gate_path").is_none());
        let back: EscalationRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.gate_path, None);

        record.gate_path = Some(vec![2, 0]);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["gate_path"], serde_json::json!([2, 0]));
    }
}
