//! Escalation: handing questions to a human.
//!
//! The `Escalator` builds an `EscalationRecord` from a failure context,
//! hands it to the configured `EscalationSink` and publishes an event. The
//! caller then suspends the run; the record travels with the paused run so
//! a failed sink never loses the question.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use cadence_types::error::ErrorContext;
use cadence_types::escalation::EscalationRecord;
use cadence_types::event::KernelEvent;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::event::EventBus;

#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("escalation queue unavailable: {0}")]
    Unavailable(String),

    #[error("failed to serialize escalation: {0}")]
    Serialization(String),
}

/// Destination for escalation records (queue, inbox, notifier).
///
/// Object-safe so the engine can hold any sink behind an `Arc`.
pub trait EscalationSink: Send + Sync {
    fn submit<'a>(
        &'a self,
        record: &'a EscalationRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), EscalationError>> + Send + 'a>>;
}

/// In-memory sink for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryEscalationSink {
    records: Mutex<Vec<EscalationRecord>>,
}

impl MemoryEscalationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<EscalationRecord> {
        self.records.lock().await.clone()
    }
}

impl EscalationSink for MemoryEscalationSink {
    fn submit<'a>(
        &'a self,
        record: &'a EscalationRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), EscalationError>> + Send + 'a>> {
        Box::pin(async move {
            self.records.lock().await.push(record.clone());
            Ok(())
        })
    }
}

/// Builds escalation records and delivers them.
#[derive(Clone)]
pub struct Escalator {
    sink: Arc<dyn EscalationSink>,
    events: EventBus,
}

impl Escalator {
    pub fn new(sink: Arc<dyn EscalationSink>, events: EventBus) -> Self {
        Self { sink, events }
    }

    /// Build a record without delivering it.
    ///
    /// Nested runs use this: their question surfaces through the parent
    /// step, which raises its own escalation.
    pub fn record(
        &self,
        run_id: Uuid,
        context: &ErrorContext,
        question: impl Into<String>,
        reasoning: impl Into<String>,
    ) -> EscalationRecord {
        EscalationRecord::new(
            context.project_id.clone().unwrap_or_default(),
            run_id,
            context.step_index.unwrap_or_default(),
            question,
            reasoning,
            context.to_value(),
        )
    }

    /// Raise an escalation for `run_id` and return the record.
    ///
    /// Sink failures are logged; the record is returned either way so the
    /// caller can persist it with the paused run.
    pub async fn escalate(
        &self,
        run_id: Uuid,
        context: &ErrorContext,
        question: impl Into<String>,
        reasoning: impl Into<String>,
    ) -> EscalationRecord {
        let record = self.record(run_id, context, question, reasoning);
        self.deliver(record).await
    }

    /// Hand an already built record to the sink and announce it.
    pub async fn deliver(&self, record: EscalationRecord) -> EscalationRecord {
        let run_id = record.run_id;
        tracing::warn!(
            escalation_id = %record.id,
            run_id = %run_id,
            step = record.step_index + 1,
            "escalating: {}",
            record.question
        );

        if let Err(e) = self.sink.submit(&record).await {
            tracing::error!(escalation_id = %record.id, "failed to submit escalation: {e}");
        }

        self.events.publish(KernelEvent::EscalationRaised {
            escalation_id: record.id,
            run_id,
            step_index: record.step_index,
            question: record.question.clone(),
        });

        record
    }
}

impl std::fmt::Debug for Escalator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Escalator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::error::{Component, ErrorCategory};

    struct FailingSink;

    impl EscalationSink for FailingSink {
        fn submit<'a>(
            &'a self,
            _record: &'a EscalationRecord,
        ) -> Pin<Box<dyn Future<Output = Result<(), EscalationError>> + Send + 'a>> {
            Box::pin(async { Err(EscalationError::Unavailable("offline".into())) })
        }
    }

    fn ctx() -> ErrorContext {
        ErrorContext::new(
            Component::Engine,
            "evaluate_condition",
            ErrorCategory::Validation,
            "condition false",
        )
        .with_project("proj")
        .with_step(1)
    }

    #[tokio::test]
    async fn escalate_submits_record_and_publishes() {
        let sink = Arc::new(MemoryEscalationSink::new());
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let escalator = Escalator::new(sink.clone(), bus);
        let run_id = Uuid::now_v7();

        let record = escalator
            .escalate(run_id, &ctx(), "Is the input clear?", "clarity is low")
            .await;

        assert_eq!(record.project_id, "proj");
        assert_eq!(record.step_index, 1);
        assert_eq!(record.context["category"], "validation");

        let stored = sink.records().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, record.id);

        assert!(matches!(
            rx.recv().await.unwrap(),
            KernelEvent::EscalationRaised { escalation_id, .. } if escalation_id == record.id
        ));
    }

    #[tokio::test]
    async fn sink_failure_still_returns_record() {
        let escalator = Escalator::new(Arc::new(FailingSink), EventBus::new(8));
        let record = escalator
            .escalate(Uuid::now_v7(), &ctx(), "question", "reason")
            .await;
        assert_eq!(record.question, "question");
    }
}
