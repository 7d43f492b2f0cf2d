//! Error taxonomy shared across the Cadence kernel.
//!
//! Every failure is described by an `ErrorCategory` (what went wrong) and
//! classified into an `ErrorType` (what the kernel does about it). The
//! category-to-type mapping lives in `cadence_core::error::classifier`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The closed three-way classification of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Absorbed where it occurs: logged, directive skipped.
    Recoverable,
    /// Transient; retried with backoff up to the attempt ceiling.
    Retryable,
    /// Needs a human (or is structural); the run suspends or ends.
    Escalation,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Recoverable => "recoverable",
            ErrorType::Retryable => "retryable",
            ErrorType::Escalation => "escalation",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    RateLimited,
    Io,
    NotFound,
    Validation,
    Conflict,
    MalformedInput,
    Configuration,
    LoopGuard,
    BudgetExhausted,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::Io => "io",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::MalformedInput => "malformed_input",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::LoopGuard => "loop_guard",
            ErrorCategory::BudgetExhausted => "budget_exhausted",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kernel component where a failure surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Engine,
    Pool,
    StateStore,
    Classifier,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Component::Engine => "engine",
            Component::Pool => "pool",
            Component::StateStore => "state_store",
            Component::Classifier => "classifier",
        })
    }
}

/// Severity attached to reported failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

/// Describes one failure for classification, logging and escalation.
///
/// Created per failure; only ever persisted inside an escalation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub operation: String,
    pub component: Component,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    #[serde(default)]
    pub attempt: u32,
    /// Whether the failing unit of work was declared optional.
    #[serde(default)]
    pub optional: bool,
    pub category: ErrorCategory,
    pub message: String,
}

impl ErrorContext {
    pub fn new(
        component: Component,
        operation: impl Into<String>,
        category: ErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            component,
            project_id: None,
            workflow: None,
            step_index: None,
            attempt: 0,
            optional: false,
            category,
            message: message.into(),
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = Some(workflow.into());
        self
    }

    pub fn with_step(mut self, step_index: usize) -> Self {
        self.step_index = Some(step_index);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// JSON form embedded in escalation records.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Errors loading or validating a workflow definition or its steps.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error("workflow definition not found: {0}")]
    NotFound(String),

    #[error("failed to parse workflow definition: {0}")]
    Parse(String),

    #[error("invalid instruction document at line {line}: {message}")]
    Instructions { line: usize, message: String },

    #[error("workflow validation failed: {0}")]
    Validation(String),

    #[error("failed to read workflow file: {0}")]
    Io(String),
}

impl WorkflowError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            WorkflowError::NotFound(_) => ErrorCategory::NotFound,
            WorkflowError::Parse(_) | WorkflowError::Instructions { .. } => {
                ErrorCategory::MalformedInput
            }
            WorkflowError::Validation(_) => ErrorCategory::Validation,
            WorkflowError::Io(_) => ErrorCategory::Io,
        }
    }
}

/// Errors loading project configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {message}")]
    Read { path: String, message: String },

    #[error("failed to parse config file '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("no model assignment configured for agent '{0}'")]
    MissingAgent(String),
}
