//! Model client abstraction.
//!
//! `ModelClient` is the trait provider adapters implement (RPITIT, like the
//! rest of the kernel's ports). `BoxModelClient` type-erases it via the
//! object-safe `ModelClientDyn` so the pool can pick a client at runtime
//! from a `ModelClientFactory`.

use std::future::Future;
use std::pin::Pin;

use cadence_types::agent::ModelAssignment;
use cadence_types::error::ErrorCategory;
use thiserror::Error;

use crate::error::Classified;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// One model call: system prompt plus user prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
}

/// The model's reply with usage when the provider reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub text: String,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            input_tokens: None,
            output_tokens: None,
        }
    }
}

/// Provider failures, already mapped into the kernel's categories.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("network error: {0}")]
    Network(String),

    #[error("provider timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("provider not found: {0}")]
    NotFound(String),

    #[error("provider misconfigured: {0}")]
    Configuration(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("provider error: {0}")]
    Provider(String),
}

impl Classified for ModelError {
    fn category(&self) -> ErrorCategory {
        match self {
            ModelError::Network(_) => ErrorCategory::Network,
            ModelError::Timeout(_) => ErrorCategory::Timeout,
            ModelError::RateLimited(_) => ErrorCategory::RateLimited,
            ModelError::Io(_) => ErrorCategory::Io,
            ModelError::NotFound(_) => ErrorCategory::NotFound,
            ModelError::Configuration(_) => ErrorCategory::Configuration,
            ModelError::InvalidResponse(_) => ErrorCategory::MalformedInput,
            ModelError::Provider(_) => ErrorCategory::Unknown,
        }
    }
}

// ---------------------------------------------------------------------------
// ModelClient trait
// ---------------------------------------------------------------------------

/// A stateless connection to one model.
///
/// Clients hold no state across calls; all context arrives in the request.
pub trait ModelClient: Send + Sync {
    /// Human-readable client name (e.g. "claude-cli").
    fn name(&self) -> &str;

    /// Send a request and wait for the full response.
    fn complete(
        &self,
        request: &ModelRequest,
    ) -> impl Future<Output = Result<ModelResponse, ModelError>> + Send;

    /// Release client-side resources (child processes, connections).
    fn close(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Object-safe version of [`ModelClient`] with boxed futures.
///
/// A blanket implementation is provided for all types implementing `ModelClient`.
pub trait ModelClientDyn: Send + Sync {
    fn name(&self) -> &str;

    fn complete_boxed<'a>(
        &'a self,
        request: &'a ModelRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ModelResponse, ModelError>> + Send + 'a>>;

    fn close_boxed(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

impl<T: ModelClient> ModelClientDyn for T {
    fn name(&self) -> &str {
        ModelClient::name(self)
    }

    fn complete_boxed<'a>(
        &'a self,
        request: &'a ModelRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ModelResponse, ModelError>> + Send + 'a>> {
        Box::pin(self.complete(request))
    }

    fn close_boxed(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.close())
    }
}

/// Type-erased model client for runtime provider selection.
pub struct BoxModelClient {
    inner: Box<dyn ModelClientDyn>,
}

impl BoxModelClient {
    pub fn new<T: ModelClient + 'static>(client: T) -> Self {
        Self {
            inner: Box::new(client),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        self.inner.complete_boxed(request).await
    }

    pub async fn close(&self) {
        self.inner.close_boxed().await
    }
}

impl std::fmt::Debug for BoxModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxModelClient")
            .field("name", &self.inner.name())
            .finish()
    }
}

/// Produces model clients for a provider/model assignment.
pub trait ModelClientFactory: Send + Sync {
    fn create(&self, assignment: &ModelAssignment) -> Result<BoxModelClient, ModelError>;
}
