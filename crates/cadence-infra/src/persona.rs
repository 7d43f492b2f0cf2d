//! Filesystem persona source.
//!
//! One markdown file per agent at `<personas_dir>/<agent>.md`:
//!
//! ```text
//! ---
//! name: analyst
//! specialization: Turns raw requirements into structured analysis.
//! ---
//! ## Principles
//! Ask before assuming.
//!
//! ## Output
//! Bullet points, most important first.
//! ```
//!
//! `## ` headings become named prompt sections. When the frontmatter has no
//! `specialization`, the text before the first section is used instead.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use cadence_core::agent::{PersonaError, PersonaSource};
use cadence_types::agent::AgentPersona;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct PersonaFrontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    specialization: Option<String>,
}

/// Loads personas from a directory of markdown files.
#[derive(Debug, Clone)]
pub struct FsPersonaSource {
    dir: PathBuf,
}

impl FsPersonaSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn persona_path(&self, agent: &str) -> PathBuf {
        self.dir.join(format!("{agent}.md"))
    }
}

impl PersonaSource for FsPersonaSource {
    fn load<'a>(
        &'a self,
        agent: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<AgentPersona, PersonaError>> + Send + 'a>> {
        Box::pin(async move {
            if agent.is_empty()
                || !agent
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
            {
                return Err(PersonaError::Invalid {
                    agent: agent.to_string(),
                    message: "agent names may only contain letters, digits, '-' and '_'"
                        .to_string(),
                });
            }

            let path = self.persona_path(agent);
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(PersonaError::NotFound(agent.to_string()));
                }
                Err(e) => return Err(PersonaError::Io(format!("{}: {e}", path.display()))),
            };

            let persona = parse_persona(agent, &content)?;
            tracing::debug!(
                agent,
                sections = persona.sections.len(),
                path = %path.display(),
                "loaded persona"
            );
            Ok(persona)
        })
    }
}

/// Split optional `---` frontmatter from the markdown body.
pub fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let trimmed = content.trim_start();
    let Some(after_opening) = trimmed.strip_prefix("---") else {
        return (None, content);
    };
    match after_opening.find("\n---") {
        Some(closing) => {
            let frontmatter = after_opening[..closing].trim();
            let rest = &after_opening[closing + 4..];
            // Drop the remainder of the closing delimiter line.
            let body = rest.find('\n').map_or("", |nl| &rest[nl + 1..]);
            (Some(frontmatter), body)
        }
        None => (None, content),
    }
}

/// Parse a persona document for `agent`.
pub fn parse_persona(agent: &str, content: &str) -> Result<AgentPersona, PersonaError> {
    let invalid = |message: String| PersonaError::Invalid {
        agent: agent.to_string(),
        message,
    };

    let (frontmatter, body) = split_frontmatter(content);
    let frontmatter = match frontmatter {
        Some(yaml) if !yaml.is_empty() => serde_yaml_ng::from_str::<PersonaFrontmatter>(yaml)
            .map_err(|e| invalid(format!("bad frontmatter: {e}")))?,
        _ => PersonaFrontmatter::default(),
    };

    let mut preamble = String::new();
    let mut sections = BTreeMap::new();
    let mut current: Option<(String, String)> = None;
    for line in body.lines() {
        if let Some(heading) = line.strip_prefix("## ") {
            if let Some((name, text)) = current.take() {
                sections.insert(name, text.trim().to_string());
            }
            current = Some((heading.trim().to_string(), String::new()));
            continue;
        }
        let target = match current.as_mut() {
            Some((_, text)) => text,
            None => &mut preamble,
        };
        target.push_str(line);
        target.push('\n');
    }
    if let Some((name, text)) = current {
        sections.insert(name, text.trim().to_string());
    }

    let specialization = frontmatter
        .specialization
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            let text = preamble
                .lines()
                .filter(|line| !line.starts_with("# "))
                .collect::<Vec<_>>()
                .join("\n");
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        })
        .ok_or_else(|| invalid("missing specialization".to_string()))?;

    Ok(AgentPersona {
        name: frontmatter.name.unwrap_or_else(|| agent.to_string()),
        specialization,
        sections,
    })
}
