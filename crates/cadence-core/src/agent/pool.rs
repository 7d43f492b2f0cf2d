//! Concurrency-bounded agent dispatch pool.
//!
//! The pool owns the only cross-run shared resources of the kernel: a fair
//! `tokio::sync::Semaphore` sized to `pool_capacity` and the counters behind
//! `queue_depth` / `leaked_count`. Every agent invocation goes through
//! `acquire` -> `invoke` -> `release`:
//!
//! 1. `acquire` resolves the model assignment (missing: configuration error,
//!    raised before waiting), waits for a slot in FIFO order, loads the
//!    persona and obtains a client from the factory.
//! 2. `invoke` checks the cost budget, sends the request under the retry
//!    executor, measures duration and estimates cost.
//! 3. `release` closes the client under `release_timeout`; a timeout is
//!    counted as a leak and the slot is reclaimed anyway.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cadence_types::agent::{
    ActivityStatus, AgentActivity, AgentPersona, AgentTask, ModelAssignment,
};
use cadence_types::config::ProjectConfig;
use cadence_types::error::{Component, ErrorCategory, ErrorContext};
use cadence_types::event::KernelEvent;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{Classified, RetryExecutor};
use crate::event::EventBus;

use super::budget::{BudgetStatus, CostBudget};
use super::client::{BoxModelClient, ModelClientFactory, ModelError, ModelRequest};
use super::cost::{estimate_cost, estimate_tokens};
use super::persona::{PersonaError, PersonaSource};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoolError {
    #[error("no model assignment configured for agent '{0}'")]
    Unassigned(String),

    #[error(transparent)]
    Persona(#[from] PersonaError),

    #[error("cannot create client for {assignment}: {source}")]
    Client {
        assignment: String,
        #[source]
        source: ModelError,
    },

    #[error("model call failed after {attempts} attempt(s): {source}")]
    Model {
        #[source]
        source: ModelError,
        attempts: u32,
        exhausted: bool,
    },

    #[error("cost budget exhausted: spent ${spent:.2} of ${limit:.2}")]
    BudgetExhausted { spent: f64, limit: f64 },

    #[error("agent pool is closed")]
    Closed,
}

impl Classified for PoolError {
    fn category(&self) -> ErrorCategory {
        match self {
            PoolError::Unassigned(_) => ErrorCategory::Configuration,
            PoolError::Persona(e) => e.category(),
            PoolError::Client { source, .. } => source.category(),
            PoolError::Model { source, .. } => source.category(),
            PoolError::BudgetExhausted { .. } => ErrorCategory::BudgetExhausted,
            PoolError::Closed => ErrorCategory::Unknown,
        }
    }

    fn retries_exhausted(&self) -> bool {
        matches!(self, PoolError::Model { exhausted: true, .. })
    }

    fn requires_operator(&self) -> bool {
        match self {
            PoolError::Persona(e) => e.requires_operator(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Invocation context and results
// ---------------------------------------------------------------------------

/// Per-call context passed by value to the pool. Clients keep none of it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationContext {
    pub project_id: String,
    pub run_id: Option<Uuid>,
    pub workflow: Option<String>,
    /// 1-based step number.
    pub step_number: Option<usize>,
    pub step_goal: Option<String>,
    pub instructions: Option<String>,
}

impl InvocationContext {
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    /// Markdown header prepended to the prompt.
    fn render(&self) -> String {
        let mut out = format!("## Context\nProject: {}\n", self.project_id);
        if let Some(workflow) = &self.workflow {
            out.push_str(&format!("Workflow: {workflow}\n"));
        }
        match (self.step_number, &self.step_goal) {
            (Some(n), Some(goal)) => out.push_str(&format!("Step {n}: {goal}\n")),
            (Some(n), None) => out.push_str(&format!("Step {n}\n")),
            _ => {}
        }
        if let Some(instructions) = self.instructions.as_deref().filter(|s| !s.is_empty()) {
            out.push('\n');
            out.push_str(instructions);
            out.push('\n');
        }
        out
    }
}

/// Result of one successful `invoke`.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub response: String,
    pub model: String,
    pub duration: Duration,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub estimated_cost_usd: f64,
    pub attempts: u32,
}

/// Result of `dispatch`: the activity record is produced either way.
#[derive(Debug)]
pub struct Dispatch {
    pub activity: AgentActivity,
    pub outcome: Result<String, PoolError>,
}

// ---------------------------------------------------------------------------
// AgentHandle
// ---------------------------------------------------------------------------

/// A held pool slot bound to one agent's persona and client.
///
/// Must be returned with [`AgentPool::release`]. Dropping it frees the slot
/// as well, but skips closing the client and logs a warning.
pub struct AgentHandle {
    agent: String,
    assignment: ModelAssignment,
    persona: AgentPersona,
    client: Arc<BoxModelClient>,
    context: InvocationContext,
    permit: Option<OwnedSemaphorePermit>,
}

impl AgentHandle {
    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn assignment(&self) -> &ModelAssignment {
        &self.assignment
    }
}

impl fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentHandle")
            .field("agent", &self.agent)
            .field("model", &self.assignment.to_string())
            .field("client", &self.client.name())
            .finish()
    }
}

impl Drop for AgentHandle {
    fn drop(&mut self) {
        if self.permit.is_some() {
            tracing::warn!(agent = %self.agent, "agent handle dropped without release; slot freed");
        }
    }
}

/// Decrements the queue counter when a waiter stops waiting (or is cancelled).
struct QueueGuard(Arc<AtomicUsize>);

impl QueueGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for QueueGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// AgentPool
// ---------------------------------------------------------------------------

/// Bounded pool of concurrent agent invocations.
pub struct AgentPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    waiting: Arc<AtomicUsize>,
    leaked: Arc<AtomicUsize>,
    config: Arc<ProjectConfig>,
    onboarding: Arc<Vec<String>>,
    factory: Arc<dyn ModelClientFactory>,
    personas: Arc<dyn PersonaSource>,
    budget: CostBudget,
    retry: RetryExecutor,
    events: EventBus,
}

impl AgentPool {
    pub fn new(
        config: ProjectConfig,
        factory: Arc<dyn ModelClientFactory>,
        personas: Arc<dyn PersonaSource>,
        events: EventBus,
    ) -> Self {
        let capacity = config.kernel.pool_capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            waiting: Arc::new(AtomicUsize::new(0)),
            leaked: Arc::new(AtomicUsize::new(0)),
            budget: CostBudget::from_limit(config.kernel.budget_usd),
            retry: RetryExecutor::new(config.kernel.retry.clone()),
            config: Arc::new(config),
            onboarding: Arc::new(Vec::new()),
            factory,
            personas,
            events,
        }
    }

    /// Onboarding documents appended to every system prompt.
    pub fn with_onboarding(mut self, documents: Vec<String>) -> Self {
        self.onboarding = Arc::new(documents);
        self
    }

    /// A pool for another project sharing this pool's slots and counters.
    ///
    /// The new pool has its own assignments, retry policy and cost budget.
    pub fn for_project(&self, config: ProjectConfig) -> Self {
        Self {
            semaphore: self.semaphore.clone(),
            capacity: self.capacity,
            waiting: self.waiting.clone(),
            leaked: self.leaked.clone(),
            budget: CostBudget::from_limit(config.kernel.budget_usd),
            retry: RetryExecutor::new(config.kernel.retry.clone()),
            config: Arc::new(config),
            onboarding: Arc::new(Vec::new()),
            factory: self.factory.clone(),
            personas: self.personas.clone(),
            events: self.events.clone(),
        }
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn budget(&self) -> &CostBudget {
        &self.budget
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn active_count(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Callers waiting for a slot.
    pub fn queue_depth(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Releases that timed out and were reclaimed.
    pub fn leaked_count(&self) -> usize {
        self.leaked.load(Ordering::SeqCst)
    }

    /// Acquire a slot for `agent` using its configured model.
    pub async fn acquire(
        &self,
        agent: &str,
        context: InvocationContext,
    ) -> Result<AgentHandle, PoolError> {
        self.acquire_with(agent, None, context).await
    }

    async fn acquire_with(
        &self,
        agent: &str,
        model: Option<ModelAssignment>,
        context: InvocationContext,
    ) -> Result<AgentHandle, PoolError> {
        let assignment = match model {
            Some(assignment) => assignment,
            None => self
                .config
                .model_for(agent)
                .cloned()
                .ok_or_else(|| PoolError::Unassigned(agent.to_string()))?,
        };

        let permit = {
            let _queued = QueueGuard::enter(&self.waiting);
            self.semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PoolError::Closed)?
        };

        tracing::debug!(
            agent,
            model = %assignment,
            active = self.active_count(),
            queued = self.queue_depth(),
            "pool slot acquired"
        );

        let persona = self.personas.load(agent).await?;
        let client = self
            .factory
            .create(&assignment)
            .map_err(|source| PoolError::Client {
                assignment: assignment.to_string(),
                source,
            })?;

        Ok(AgentHandle {
            agent: agent.to_string(),
            assignment,
            persona,
            client: Arc::new(client),
            context,
            permit: Some(permit),
        })
    }

    /// Send `prompt` through the handle's client under the retry policy.
    pub async fn invoke(&self, handle: &AgentHandle, prompt: &str) -> Result<Invocation, PoolError> {
        if self.budget.is_exhausted() {
            return Err(PoolError::BudgetExhausted {
                spent: self.budget.spent_usd(),
                limit: self.budget.limit_usd().unwrap_or_default(),
            });
        }

        let request = ModelRequest {
            model: handle.assignment.model.clone(),
            system: self.system_prompt(&handle.persona),
            prompt: format!(
                "{}\n{}",
                handle.context.render(),
                self.bound_prompt(&handle.agent, prompt)
            ),
        };

        let context = ErrorContext::new(
            Component::Pool,
            "invoke",
            ErrorCategory::Unknown,
            format!("agent '{}' on {}", handle.agent, handle.assignment),
        )
        .with_project(handle.context.project_id.clone());

        let started = Instant::now();
        let mut attempts = 0;
        let result = self
            .retry
            .run(&context, |attempt| {
                attempts = attempt;
                let client = handle.client.clone();
                let request = request.clone();
                async move { client.complete(&request).await }
            })
            .await;
        let duration = started.elapsed();

        let response = result.map_err(|failure| PoolError::Model {
            attempts: failure.attempts,
            exhausted: failure.exhausted,
            source: failure.error,
        })?;

        let input_tokens = response
            .input_tokens
            .unwrap_or_else(|| estimate_tokens(&request.system) + estimate_tokens(&request.prompt));
        let output_tokens = response
            .output_tokens
            .unwrap_or_else(|| estimate_tokens(&response.text));
        let cost = estimate_cost(
            input_tokens,
            output_tokens,
            &handle.assignment.model,
            &handle.assignment.provider,
            &self.config.pricing,
        );

        match self.budget.charge(cost) {
            BudgetStatus::Ok => {}
            BudgetStatus::Warning => tracing::warn!(
                project_id = %handle.context.project_id,
                spent = self.budget.spent_usd(),
                "cost budget 80% consumed"
            ),
            BudgetStatus::Exhausted => tracing::warn!(
                project_id = %handle.context.project_id,
                spent = self.budget.spent_usd(),
                "cost budget exhausted; further invocations will be refused"
            ),
        }

        Ok(Invocation {
            response: response.text,
            model: handle.assignment.to_string(),
            duration,
            input_tokens,
            output_tokens,
            estimated_cost_usd: cost,
            attempts,
        })
    }

    /// Return the slot, closing the client under the release timeout.
    pub async fn release(&self, mut handle: AgentHandle) {
        let permit = handle.permit.take();
        let timeout = self.config.kernel.release_timeout();

        if tokio::time::timeout(timeout, handle.client.close()).await.is_err() {
            self.leaked.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(
                agent = %handle.agent,
                timeout_ms = timeout.as_millis() as u64,
                "release timed out; reclaiming slot"
            );
        }

        drop(permit);
    }

    /// Acquire, invoke and release in one call, producing an activity record.
    pub async fn dispatch(&self, task: &AgentTask, context: InvocationContext) -> Dispatch {
        let started_at = Utc::now();
        let started = Instant::now();
        let model_label = task
            .model
            .clone()
            .or_else(|| self.config.model_for(&task.agent).cloned())
            .map_or_else(|| "unassigned".to_string(), |m| m.to_string());

        let outcome = match self
            .acquire_with(&task.agent, task.model.clone(), context)
            .await
        {
            Ok(handle) => {
                let result = self.invoke(&handle, &task.prompt).await;
                self.release(handle).await;
                result
            }
            Err(e) => Err(e),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let (status, cost, error) = match &outcome {
            Ok(invocation) => (ActivityStatus::Succeeded, invocation.estimated_cost_usd, None),
            Err(e) => (ActivityStatus::Failed, 0.0, Some(e.to_string())),
        };

        match &outcome {
            Ok(_) => tracing::info!(
                task_id = %task.id,
                agent = %task.agent,
                model = %model_label,
                duration_ms,
                cost_usd = cost,
                "agent invocation succeeded"
            ),
            Err(e) => tracing::warn!(
                task_id = %task.id,
                agent = %task.agent,
                model = %model_label,
                duration_ms,
                "agent invocation failed: {e}"
            ),
        }

        self.events.publish(KernelEvent::AgentInvoked {
            task_id: task.id,
            agent: task.agent.clone(),
            model: model_label.clone(),
            duration_ms,
            estimated_cost_usd: cost,
            success: outcome.is_ok(),
        });

        Dispatch {
            activity: AgentActivity {
                task_id: task.id,
                agent: task.agent.clone(),
                task: task.describe(),
                model: model_label,
                started_at,
                duration_ms,
                estimated_cost_usd: cost,
                status,
                error,
            },
            outcome: outcome.map(|invocation| invocation.response),
        }
    }

    fn system_prompt(&self, persona: &AgentPersona) -> String {
        let mut system = persona.system_prompt();
        for document in self.onboarding.iter() {
            system.push_str("\n\n---\n\n");
            system.push_str(document);
        }
        system
    }

    /// Truncate prompts longer than `max_prompt_chars`.
    fn bound_prompt(&self, agent: &str, prompt: &str) -> String {
        let max = self.config.kernel.max_prompt_chars;
        let length = prompt.chars().count();
        if length <= max {
            return prompt.to_string();
        }
        tracing::warn!(agent, length, max, "prompt exceeds bound, truncating");
        prompt.chars().take(max).collect()
    }
}

impl fmt::Debug for AgentPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentPool")
            .field("capacity", &self.capacity)
            .field("active", &self.active_count())
            .field("queued", &self.queue_depth())
            .field("leaked", &self.leaked_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
