//! Error classification, retry and escalation.
//!
//! - `classifier` -- deterministic category-to-type mapping and critical reporting
//! - `retry` -- the retry executor with a fixed backoff schedule
//! - `escalation` -- escalation records and the sink they are handed to

pub mod classifier;
pub mod escalation;
pub mod retry;

use cadence_types::error::{ErrorCategory, WorkflowError};

pub use classifier::{ErrorClassifier, classify, classify_error};
pub use escalation::{EscalationError, EscalationSink, Escalator, MemoryEscalationSink};
pub use retry::{RetryDecision, RetryExecutor, RetryFailure, retry_with_backoff};

/// Kernel errors that can be fed to the classifier.
pub trait Classified: std::error::Error {
    /// What kind of failure this is.
    fn category(&self) -> ErrorCategory;

    /// Whether a retry loop already gave up on this failure.
    ///
    /// Exhausted failures classify as escalations regardless of category.
    fn retries_exhausted(&self) -> bool {
        false
    }

    /// Whether only an operator can resolve this failure, even on an
    /// optional step.
    fn requires_operator(&self) -> bool {
        false
    }
}

impl Classified for WorkflowError {
    fn category(&self) -> ErrorCategory {
        WorkflowError::category(self)
    }
}
