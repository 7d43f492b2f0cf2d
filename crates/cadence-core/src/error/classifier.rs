//! Deterministic failure classification.
//!
//! Maps an `ErrorCategory` plus the failure's `ErrorContext` to one of the
//! three `ErrorType`s. The mapping is total and has no side effects; only
//! `report_critical` logs and publishes.

use cadence_types::error::{ErrorCategory, ErrorContext, ErrorType, Severity};
use cadence_types::event::KernelEvent;

use crate::event::EventBus;

use super::Classified;

/// Classify a failure category in the given context.
///
/// | category | type |
/// |---|---|
/// | network, timeout, rate_limited, io | retryable |
/// | not_found | recoverable when optional, else escalation |
/// | everything else | escalation |
pub fn classify(category: ErrorCategory, context: &ErrorContext) -> ErrorType {
    match category {
        ErrorCategory::Network
        | ErrorCategory::Timeout
        | ErrorCategory::RateLimited
        | ErrorCategory::Io => ErrorType::Retryable,
        ErrorCategory::NotFound if context.optional => ErrorType::Recoverable,
        ErrorCategory::NotFound
        | ErrorCategory::Validation
        | ErrorCategory::Conflict
        | ErrorCategory::MalformedInput
        | ErrorCategory::Configuration
        | ErrorCategory::LoopGuard
        | ErrorCategory::BudgetExhausted
        | ErrorCategory::Unknown => ErrorType::Escalation,
    }
}

/// Classify a kernel error, honoring exhausted retries and failures that
/// need an operator.
pub fn classify_error<E: Classified + ?Sized>(error: &E, context: &ErrorContext) -> ErrorType {
    if error.retries_exhausted() || error.requires_operator() {
        return ErrorType::Escalation;
    }
    classify(error.category(), context)
}

/// Classifier handle that can also report critical failures.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    events: EventBus,
}

impl ErrorClassifier {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }

    pub fn classify(&self, category: ErrorCategory, context: &ErrorContext) -> ErrorType {
        classify(category, context)
    }

    /// Log a failure at error level and publish a critical-failure event.
    ///
    /// Used for failures the kernel survives but an operator must see, such
    /// as a checkpoint that could not be persisted.
    pub fn report_critical(&self, context: &ErrorContext) {
        tracing::error!(
            component = %context.component,
            operation = %context.operation,
            category = %context.category,
            project_id = context.project_id.as_deref().unwrap_or("-"),
            step = ?context.step_index,
            "critical failure: {}",
            context.message
        );
        self.events.publish(KernelEvent::CriticalFailure {
            project_id: context.project_id.clone(),
            operation: context.operation.clone(),
            category: context.category,
            severity: Severity::Critical,
            message: context.message.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::error::Component;

    fn ctx(category: ErrorCategory) -> ErrorContext {
        ErrorContext::new(Component::Engine, "test", category, "failure")
    }

    #[test]
    fn transient_categories_are_retryable() {
        for category in [
            ErrorCategory::Network,
            ErrorCategory::Timeout,
            ErrorCategory::RateLimited,
            ErrorCategory::Io,
        ] {
            assert_eq!(classify(category, &ctx(category)), ErrorType::Retryable);
        }
    }

    #[test]
    fn not_found_depends_on_optional_flag() {
        let required = ctx(ErrorCategory::NotFound);
        let optional = ctx(ErrorCategory::NotFound).optional(true);
        assert_eq!(classify(ErrorCategory::NotFound, &required), ErrorType::Escalation);
        assert_eq!(classify(ErrorCategory::NotFound, &optional), ErrorType::Recoverable);
    }

    #[test]
    fn everything_else_escalates() {
        for category in [
            ErrorCategory::Validation,
            ErrorCategory::Conflict,
            ErrorCategory::MalformedInput,
            ErrorCategory::Configuration,
            ErrorCategory::LoopGuard,
            ErrorCategory::BudgetExhausted,
            ErrorCategory::Unknown,
        ] {
            // The optional flag never softens these.
            let context = ctx(category).optional(true);
            assert_eq!(classify(category, &context), ErrorType::Escalation);
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("gave up")]
    struct GaveUp;

    impl Classified for GaveUp {
        fn category(&self) -> ErrorCategory {
            ErrorCategory::Network
        }

        fn retries_exhausted(&self) -> bool {
            true
        }
    }

    #[test]
    fn exhausted_retries_escalate() {
        let context = ctx(ErrorCategory::Network);
        assert_eq!(classify_error(&GaveUp, &context), ErrorType::Escalation);
    }

    #[test]
    fn missing_persona_escalates_even_when_optional() {
        use crate::agent::{PersonaError, PoolError};

        let err = PoolError::Persona(PersonaError::NotFound("ghost".into()));
        let context = ctx(err.category()).optional(true);
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert_eq!(classify_error(&err, &context), ErrorType::Escalation);

        let unreadable = PoolError::Persona(PersonaError::Io("denied".into()));
        assert_eq!(classify_error(&unreadable, &context), ErrorType::Retryable);
    }

    #[tokio::test]
    async fn report_critical_publishes_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let classifier = ErrorClassifier::new(bus);

        classifier.report_critical(&ctx(ErrorCategory::Io).with_project("proj"));

        match rx.recv().await.unwrap() {
            KernelEvent::CriticalFailure { project_id, severity, .. } => {
                assert_eq!(project_id.as_deref(), Some("proj"));
                assert_eq!(severity, Severity::Critical);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
