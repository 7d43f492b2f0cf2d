//! File-based template rendering for `template-output` directives.
//!
//! A workflow's `template` is a markdown file split into named sections:
//!
//! ```text
//! # {{ project_name }} requirements
//!
//! <!-- section: overview -->
//! {{ overview_notes }}
//! <!-- /section -->
//! ```
//!
//! Rendering a section resolves its `{{ path }}` references against the
//! run's variables. When the workflow declares a `default_output`, the whole
//! template is re-rendered into that file after every section, so the
//! output document grows as the workflow progresses.

use std::path::{Path, PathBuf};

use cadence_core::workflow::{
    BoxFuture, CollaboratorError, LoadedWorkflow, RenderRequest, TemplateRenderer, resolve_template,
};
use cadence_types::variables::Variables;
use serde_json::Value;

use crate::filesystem::write_atomic;

const SECTION_OPEN: &str = "<!-- section:";
const SECTION_CLOSE: &str = "<!-- /section -->";

/// Renders template sections from files on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTemplateRenderer;

impl FileTemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    async fn read_template(workflow: &LoadedWorkflow) -> Result<(PathBuf, String), CollaboratorError> {
        let template = workflow.definition.template.as_deref().ok_or_else(|| {
            CollaboratorError::Invalid(format!(
                "workflow '{}' declares no template",
                workflow.name()
            ))
        })?;
        let path = workflow.resolve_path(template);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok((path, text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CollaboratorError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(CollaboratorError::Io(format!("{}: {e}", path.display()))),
        }
    }

    async fn write_output(
        workflow: &LoadedWorkflow,
        output: &Path,
        template: &str,
        variables: &Variables,
    ) -> Result<PathBuf, CollaboratorError> {
        let output = resolve_template(&output.to_string_lossy(), variables);
        let path = workflow.resolve_path(Path::new(&output));
        let document = resolve_template(&strip_markers(template), variables);
        write_atomic(&path, document.as_bytes())
            .await
            .map_err(|e| CollaboratorError::Io(format!("{}: {e}", path.display())))?;
        Ok(path)
    }
}

impl TemplateRenderer for FileTemplateRenderer {
    fn render<'a>(&'a self, request: RenderRequest<'a>) -> BoxFuture<'a, Result<String, CollaboratorError>> {
        Box::pin(async move {
            let (path, template) = Self::read_template(request.workflow).await?;
            let section = extract_section(&template, request.section).ok_or_else(|| {
                CollaboratorError::NotFound(format!(
                    "section '{}' in {}",
                    request.section,
                    path.display()
                ))
            })?;
            let rendered = resolve_template(section.trim(), request.variables);

            if let Some(output) = request.workflow.definition.default_output.as_deref() {
                let mut variables = request.variables.clone();
                variables.set_path(request.section, Value::String(rendered.clone()));
                let written =
                    Self::write_output(request.workflow, output, &template, &variables).await?;
                tracing::debug!(
                    run_id = %request.run_id,
                    section = request.section,
                    output = %written.display(),
                    "output document updated"
                );
            }
            Ok(rendered)
        })
    }
}

/// Body of `<!-- section: name -->`, up to its close marker, the next
/// section or the end of the template.
pub fn extract_section<'t>(template: &'t str, name: &str) -> Option<&'t str> {
    let mut rest = template;
    while let Some(start) = rest.find(SECTION_OPEN) {
        let after = &rest[start + SECTION_OPEN.len()..];
        let close = after.find("-->")?;
        let body = &after[close + 3..];
        if after[..close].trim() == name {
            let end = [body.find(SECTION_CLOSE), body.find(SECTION_OPEN)]
                .into_iter()
                .flatten()
                .min()
                .unwrap_or(body.len());
            return Some(&body[..end]);
        }
        rest = body;
    }
    None
}

/// The template with section marker lines removed.
pub fn strip_markers(template: &str) -> String {
    template
        .lines()
        .filter(|line| {
            let line = line.trim();
            !(line.starts_with(SECTION_OPEN) || line == SECTION_CLOSE)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use cadence_types::workflow::WorkflowDefinition;
    use serde_json::json;
    use tempfile::tempdir;
    use uuid::Uuid;

    const TEMPLATE: &str = "# {{ title }}\n\n<!-- section: overview -->\nScope: {{ scope }}\n<!-- /section -->\n\n<!-- section: risks -->\n{{ risks }}\n";

    fn workflow(base: &Path, output: Option<&str>) -> LoadedWorkflow {
        let definition = WorkflowDefinition {
            name: "prd".into(),
            description: None,
            instructions: "prd.md".into(),
            template: Some("template.md".into()),
            default_output: output.map(PathBuf::from),
            variables: BTreeMap::new(),
        };
        LoadedWorkflow::from_document(
            definition,
            r#"<step n="1" goal="Write"><template-output section="overview"/></step>"#,
            base,
        )
        .unwrap()
    }

    #[test]
    fn sections_end_at_close_next_section_or_eof() {
        assert_eq!(
            extract_section(TEMPLATE, "overview").map(str::trim),
            Some("Scope: {{ scope }}")
        );
        assert_eq!(
            extract_section(TEMPLATE, "risks").map(str::trim),
            Some("{{ risks }}")
        );
        assert_eq!(extract_section(TEMPLATE, "missing"), None);
    }

    #[tokio::test]
    async fn renders_section_and_writes_output() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("template.md"), TEMPLATE)
            .await
            .unwrap();
        let workflow = workflow(dir.path(), Some("out/{{ title }}.md"));

        let mut variables = Variables::new();
        variables.set("title", json!("billing"));
        variables.set("scope", json!("invoices only"));

        let rendered = FileTemplateRenderer::new()
            .render(RenderRequest {
                run_id: Uuid::now_v7(),
                project_id: "proj",
                workflow: &workflow,
                section: "overview",
                variables: &variables,
            })
            .await
            .unwrap();
        assert_eq!(rendered, "Scope: invoices only");

        let written = tokio::fs::read_to_string(dir.path().join("out/billing.md"))
            .await
            .unwrap();
        assert!(written.starts_with("# billing"));
        assert!(written.contains("Scope: invoices only"));
        assert!(!written.contains("<!--"));
    }

    #[tokio::test]
    async fn missing_section_or_template_is_not_found() {
        let dir = tempdir().unwrap();
        let workflow = workflow(dir.path(), None);
        let variables = Variables::new();
        let request = || RenderRequest {
            run_id: Uuid::now_v7(),
            project_id: "proj",
            workflow: &workflow,
            section: "appendix",
            variables: &variables,
        };

        let err = FileTemplateRenderer::new().render(request()).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::NotFound(_)));

        tokio::fs::write(dir.path().join("template.md"), TEMPLATE)
            .await
            .unwrap();
        let err = FileTemplateRenderer::new().render(request()).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::NotFound(msg) if msg.contains("appendix")));
    }
}
