//! Workflow definition parsing, validation, and loading.
//!
//! A definition is a small YAML file naming the step-instruction document
//! (relative to the definition's directory), an optional output template
//! and variable defaults. `LoadedWorkflow` bundles the definition with its
//! parsed steps so the engine never touches the filesystem.
//!
//! A standalone task document (`invoke-task`) loads as a workflow without a
//! YAML wrapper: the document itself is the instruction file and the name
//! comes from the file stem.

use std::path::{Path, PathBuf};

use cadence_types::error::WorkflowError;
use cadence_types::variables::Variables;
use cadence_types::workflow::{Step, WorkflowDefinition};

use super::instructions::{parse_instructions, validate_steps};

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty and contains only alphanumerics, hyphens and underscores
/// - The instruction path is non-empty
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.name.is_empty() {
        return Err(WorkflowError::Validation(
            "workflow name must not be empty".to_string(),
        ));
    }
    if !def
        .name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(WorkflowError::Validation(format!(
            "workflow name '{}' contains invalid characters (only alphanumerics, hyphens and underscores allowed)",
            def.name
        )));
    }
    if def.instructions.as_os_str().is_empty() {
        return Err(WorkflowError::Validation(format!(
            "workflow '{}' does not name an instruction document",
            def.name
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// LoadedWorkflow
// ---------------------------------------------------------------------------

/// A definition together with its parsed, validated steps.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedWorkflow {
    pub definition: WorkflowDefinition,
    pub steps: Vec<Step>,
    /// Directory relative paths in the definition resolve against.
    pub base_dir: PathBuf,
}

impl LoadedWorkflow {
    /// Assemble a workflow from already-parsed parts, re-checking goto targets.
    pub fn new(
        definition: WorkflowDefinition,
        steps: Vec<Step>,
        base_dir: impl Into<PathBuf>,
    ) -> Result<Self, WorkflowError> {
        validate_definition(&definition)?;
        if steps.is_empty() {
            return Err(WorkflowError::Validation(format!(
                "workflow '{}' has no steps",
                definition.name
            )));
        }
        validate_steps(&steps)?;
        Ok(Self {
            definition,
            steps,
            base_dir: base_dir.into(),
        })
    }

    /// Build a workflow from an in-memory instruction document.
    pub fn from_document(
        definition: WorkflowDefinition,
        document: &str,
        base_dir: impl Into<PathBuf>,
    ) -> Result<Self, WorkflowError> {
        let steps = parse_instructions(document)?;
        Self::new(definition, steps, base_dir)
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Resolve a path from the definition or a directive against `base_dir`.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Declared variable defaults.
    pub fn default_variables(&self) -> Variables {
        self.definition
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Variables for a new run: defaults overlaid with caller-provided values.
    pub fn initial_variables(&self, overrides: Variables) -> Variables {
        let mut variables = self.default_variables();
        variables.merge(overrides);
        variables
    }
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, WorkflowError> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => WorkflowError::NotFound(path.display().to_string()),
        _ => WorkflowError::Io(format!("{}: {e}", path.display())),
    })
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Load a workflow definition file and its instruction document.
pub fn load_workflow_file(path: &Path) -> Result<LoadedWorkflow, WorkflowError> {
    let definition = parse_workflow_yaml(&read_file(path)?)?;
    let base_dir = parent_dir(path);
    let instructions_path = if definition.instructions.is_absolute() {
        definition.instructions.clone()
    } else {
        base_dir.join(&definition.instructions)
    };
    let document = read_file(&instructions_path)?;
    tracing::debug!(
        workflow = %definition.name,
        path = %path.display(),
        "loaded workflow definition"
    );
    LoadedWorkflow::from_document(definition, &document, base_dir)
}

/// Load a standalone task document as a single-file workflow.
pub fn load_task_file(path: &Path) -> Result<LoadedWorkflow, WorkflowError> {
    let document = read_file(path)?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("task")
        .to_string();
    let instructions = path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| path.to_path_buf());

    let definition = WorkflowDefinition {
        name,
        description: None,
        instructions,
        template: None,
        default_output: None,
        variables: Default::default(),
    };
    LoadedWorkflow::from_document(definition, &document, parent_dir(path))
}

/// Load either kind of file, choosing by extension (`.md` is a task).
pub fn load_any(path: &Path) -> Result<LoadedWorkflow, WorkflowError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("md") | Some("markdown") => load_task_file(path),
        _ => load_workflow_file(path),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DOC: &str = r#"
# Review

<step n="1" goal="Read">Read the input.</step>
<step n="2" goal="Summarise">
  <ask agent="analyst" store="summary">Summarise {{ topic }}</ask>
</step>
"#;

    #[test]
    fn parse_valid_definition() {
        let def = parse_workflow_yaml(
            "name: create_prd\ninstructions: instructions.md\nvariables:\n  topic: billing\n",
        )
        .unwrap();
        assert_eq!(def.name, "create_prd");
        assert_eq!(def.variables["topic"], json!("billing"));
    }

    #[test]
    fn reject_invalid_name() {
        let err = parse_workflow_yaml("name: 'bad name!'\ninstructions: i.md\n").unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[test]
    fn reject_missing_instructions_field() {
        let err = parse_workflow_yaml("name: wf\n").unwrap_err();
        assert!(matches!(err, WorkflowError::Parse(_)));
    }

    #[test]
    fn load_workflow_file_reads_instructions_relative_to_definition() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("wf")).unwrap();
        std::fs::write(
            dir.path().join("wf/workflow.yaml"),
            "name: review\ninstructions: steps.md\nvariables:\n  topic: onboarding\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("wf/steps.md"), DOC).unwrap();

        let loaded = load_workflow_file(&dir.path().join("wf/workflow.yaml")).unwrap();
        assert_eq!(loaded.name(), "review");
        assert_eq!(loaded.step_count(), 2);
        assert_eq!(loaded.base_dir, dir.path().join("wf"));
        assert_eq!(
            loaded.resolve_path(Path::new("sub/workflow.yaml")),
            dir.path().join("wf/sub/workflow.yaml")
        );

        let mut overrides = Variables::new();
        overrides.set("extra", json!(true));
        let vars = loaded.initial_variables(overrides);
        assert_eq!(vars.get("topic"), Some(&json!("onboarding")));
        assert_eq!(vars.get("extra"), Some(&json!(true)));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_workflow_file(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[test]
    fn missing_instruction_document_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("workflow.yaml"), "name: wf\ninstructions: gone.md\n").unwrap();
        let err = load_workflow_file(&dir.path().join("workflow.yaml")).unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(p) if p.ends_with("gone.md")));
    }

    #[test]
    fn task_file_takes_name_from_stem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tasks")).unwrap();
        let path = dir.path().join("tasks/code-review.md");
        std::fs::write(&path, DOC).unwrap();

        let loaded = load_any(&path).unwrap();
        assert_eq!(loaded.name(), "code-review");
        assert_eq!(loaded.steps.len(), 2);
        assert!(loaded.default_variables().is_empty());
    }
}
