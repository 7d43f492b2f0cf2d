//! Agent dispatch: the bounded pool, model client port, persona port and
//! cost accounting.

pub mod budget;
pub mod client;
pub mod cost;
pub mod persona;
pub mod pool;

pub use budget::{BudgetStatus, CostBudget};
pub use client::{
    BoxModelClient, ModelClient, ModelClientDyn, ModelClientFactory, ModelError, ModelRequest,
    ModelResponse,
};
pub use cost::{estimate_cost, estimate_tokens, format_cost};
pub use persona::{PersonaError, PersonaSource, StaticPersonaSource};
pub use pool::{AgentHandle, AgentPool, Dispatch, Invocation, InvocationContext, PoolError};
