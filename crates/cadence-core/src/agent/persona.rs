//! Persona lookup port.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use cadence_types::agent::AgentPersona;
use cadence_types::error::ErrorCategory;
use thiserror::Error;

use crate::error::Classified;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PersonaError {
    #[error("persona not found for agent '{0}'")]
    NotFound(String),

    #[error("invalid persona for agent '{agent}': {message}")]
    Invalid { agent: String, message: String },

    #[error("failed to read persona: {0}")]
    Io(String),
}

impl Classified for PersonaError {
    fn category(&self) -> ErrorCategory {
        match self {
            PersonaError::NotFound(_) => ErrorCategory::NotFound,
            PersonaError::Invalid { .. } => ErrorCategory::MalformedInput,
            PersonaError::Io(_) => ErrorCategory::Io,
        }
    }

    /// An agent without a persona cannot be dispatched on any step.
    fn requires_operator(&self) -> bool {
        matches!(self, PersonaError::NotFound(_))
    }
}

/// Source of agent personas (persona files, an embedded catalog, ...).
pub trait PersonaSource: Send + Sync {
    fn load<'a>(
        &'a self,
        agent: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<AgentPersona, PersonaError>> + Send + 'a>>;
}

/// Fixed in-memory persona catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticPersonaSource {
    personas: HashMap<String, AgentPersona>,
}

impl StaticPersonaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persona(mut self, persona: AgentPersona) -> Self {
        self.personas.insert(persona.name.clone(), persona);
        self
    }
}

impl PersonaSource for StaticPersonaSource {
    fn load<'a>(
        &'a self,
        agent: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<AgentPersona, PersonaError>> + Send + 'a>> {
        Box::pin(async move {
            self.personas
                .get(agent)
                .cloned()
                .ok_or_else(|| PersonaError::NotFound(agent.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn static_source_finds_registered_personas() {
        let source = StaticPersonaSource::new().with_persona(AgentPersona {
            name: "analyst".into(),
            specialization: "Requirements".into(),
            sections: BTreeMap::new(),
        });

        assert_eq!(source.load("analyst").await.unwrap().specialization, "Requirements");
        let err = source.load("dev").await.unwrap_err();
        assert_eq!(err, PersonaError::NotFound("dev".into()));
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }
}
