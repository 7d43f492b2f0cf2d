//! Workflow execution: instruction parsing, definitions and the engine.
//!
//! - `instructions` -- step-instruction document parser
//! - `condition` -- restricted predicate language for step gates and checks
//! - `template` -- `{{ path }}` substitution
//! - `definition` -- YAML definitions and `LoadedWorkflow`
//! - `collaborators` -- action, template and loader ports
//! - `engine` / `step_runner` -- sequential execution with checkpoints

pub mod collaborators;
pub mod condition;
pub mod definition;
pub mod engine;
pub mod instructions;
pub mod step_runner;
pub mod template;

pub use collaborators::{
    ActionRequest, ActionRunner, BoxFuture, CollaboratorError, FsWorkflowLoader, NoopActionRunner,
    NoopTemplateRenderer, RenderRequest, TemplateRenderer, WorkflowLoader,
};
pub use condition::{Condition, ConditionError, evaluate_condition};
pub use definition::{
    LoadedWorkflow, load_any, load_task_file, load_workflow_file, parse_workflow_yaml,
    validate_definition,
};
pub use engine::{EngineError, WorkflowEngine};
pub use instructions::{parse_instructions, validate_steps};
pub use step_runner::{StepError, StepOutcome};
pub use template::{resolve_inputs, resolve_template};
