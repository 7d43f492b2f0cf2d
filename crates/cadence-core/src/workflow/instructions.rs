//! Step-instruction document parser.
//!
//! Instruction documents are markdown with tagged blocks. Only `<step>`
//! blocks are significant; prose around them is ignored. Inside a step,
//! text outside directive tags becomes the step's plain instructions and
//! each directive tag becomes a `Directive`:
//!
//! ```text
//! <step n="1" goal="Set up" optional="true" if="inputs.ready == true">
//!   Plain instruction text.
//!   <action set="x=1">Record the starting point</action>
//!   <ask agent="analyst" store="summary">Summarise {{ x }}</ask>
//!   <check if="summary != null"> ...nested directives... </check>
//!   <goto step="1"/>
//!   <invoke-workflow path="sub/workflow.yaml" inputs="topic=x"/>
//!   <invoke-task path="tasks/review.md"/>
//!   <template-output section="overview"/>
//! </step>
//! ```
//!
//! Unknown tags inside a step are kept as instruction text. Multiple
//! assignments or inputs are separated with `;`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use cadence_types::error::WorkflowError;
use cadence_types::workflow::{Assignment, Directive, Step};
use serde_json::Value;

use super::condition::Condition;

/// Parse an instruction document into its ordered steps.
///
/// Conditions are syntax-checked and goto targets validated; a document
/// that parses is safe to hand to the engine.
pub fn parse_instructions(document: &str) -> Result<Vec<Step>, WorkflowError> {
    let mut scanner = Scanner::new(document);
    let mut steps = Vec::new();

    while let Some(start) = scanner.find_tag("step") {
        scanner.pos = start;
        let step = scanner.parse_step(steps.len())?;
        steps.push(step);
    }

    if steps.is_empty() {
        return Err(WorkflowError::Instructions {
            line: 1,
            message: "document contains no <step> blocks".to_string(),
        });
    }

    validate_steps(&steps)?;
    Ok(steps)
}

/// Check goto targets against the step list.
///
/// Rejects targets outside the document and a goto that unconditionally
/// targets its own step (a guaranteed infinite loop).
pub fn validate_steps(steps: &[Step]) -> Result<(), WorkflowError> {
    for step in steps {
        for (directive, guarded) in walk_directives(&step.directives, false) {
            let Directive::Goto { step: target } = directive else {
                continue;
            };
            if *target == 0 || *target > steps.len() {
                return Err(WorkflowError::Validation(format!(
                    "step {} jumps to step {target}, but the document has {} steps",
                    step.number(),
                    steps.len()
                )));
            }
            if *target == step.number() && !guarded && step.condition.is_none() {
                return Err(WorkflowError::Validation(format!(
                    "step {} unconditionally jumps to itself",
                    step.number()
                )));
            }
        }
    }
    Ok(())
}

/// Flatten directives depth-first, flagging those nested under a check.
fn walk_directives(directives: &[Directive], guarded: bool) -> Vec<(&Directive, bool)> {
    let mut out = Vec::new();
    for directive in directives {
        out.push((directive, guarded));
        if let Directive::Check { body, .. } = directive {
            out.extend(walk_directives(body, true));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

/// An opening tag: name, attributes, and whether it was self-closing.
struct Tag {
    name: String,
    attrs: BTreeMap<String, String>,
    self_closing: bool,
    line: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn line(&self, pos: usize) -> usize {
        self.src[..pos].matches('\n').count() + 1
    }

    fn error(&self, pos: usize, message: impl Into<String>) -> WorkflowError {
        WorkflowError::Instructions {
            line: self.line(pos),
            message: message.into(),
        }
    }

    /// Byte offset of the next `<name` tag at or after `pos`.
    fn find_tag(&self, name: &str) -> Option<usize> {
        let needle = format!("<{name}");
        let mut from = self.pos;
        while let Some(offset) = self.src[from..].find(&needle) {
            let at = from + offset;
            let after = self.src[at + needle.len()..].chars().next();
            if matches!(after, Some(c) if c.is_whitespace() || c == '>' || c == '/') {
                return Some(at);
            }
            from = at + needle.len();
        }
        None
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    /// Parse an opening tag at `self.pos` (which must point at `<`).
    fn parse_open_tag(&mut self) -> Result<Tag, WorkflowError> {
        let start = self.pos;
        let line = self.line(start);
        self.pos += 1;

        let name_len = self
            .rest()
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
            .unwrap_or(self.rest().len());
        let name = self.rest()[..name_len].to_string();
        self.pos += name_len;

        let mut attrs = BTreeMap::new();
        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.starts_with("/>") {
                self.pos += 2;
                return Ok(Tag { name, attrs, self_closing: true, line });
            }
            if rest.starts_with('>') {
                self.pos += 1;
                return Ok(Tag { name, attrs, self_closing: false, line });
            }
            if rest.is_empty() {
                return Err(self.error(start, format!("unterminated <{name}> tag")));
            }

            let key_len = rest
                .find(|c: char| c == '=' || c.is_whitespace() || c == '>' || c == '/')
                .unwrap_or(rest.len());
            if key_len == 0 {
                return Err(self.error(self.pos, format!("malformed attribute in <{name}>")));
            }
            let key = rest[..key_len].to_string();
            self.pos += key_len;
            self.skip_whitespace();

            if !self.rest().starts_with('=') {
                return Err(self.error(self.pos, format!("attribute '{key}' in <{name}> has no value")));
            }
            self.pos += 1;
            self.skip_whitespace();

            let quote = match self.rest().chars().next() {
                Some(q @ ('"' | '\'')) => q,
                _ => {
                    return Err(self.error(
                        self.pos,
                        format!("attribute '{key}' in <{name}> must be quoted"),
                    ));
                }
            };
            self.pos += 1;
            let Some(close) = self.rest().find(quote) else {
                return Err(self.error(self.pos, format!("unterminated value for '{key}'")));
            };
            let value = decode_entities(&self.rest()[..close]);
            self.pos += close + 1;
            attrs.insert(key, value);
        }
    }

    /// Parse a `<step>` block starting at `self.pos`.
    fn parse_step(&mut self, index: usize) -> Result<Step, WorkflowError> {
        let start = self.pos;
        let tag = self.parse_open_tag()?;

        let number = required(&tag, "n", self, start)?;
        let parsed: usize = number
            .parse()
            .map_err(|_| self.error(start, format!("step number '{number}' is not an integer")))?;
        if parsed != index + 1 {
            return Err(self.error(
                start,
                format!("step n=\"{parsed}\" out of order; expected n=\"{}\"", index + 1),
            ));
        }

        let goal = required(&tag, "goal", self, start)?;
        let optional = parse_bool(&tag, "optional", self, start)?;
        let condition = match tag.attrs.get("if") {
            Some(source) => {
                validate_condition(source, tag.line)?;
                Some(source.clone())
            }
            None => None,
        };

        let (instructions, directives) = if tag.self_closing {
            (String::new(), Vec::new())
        } else {
            self.parse_body("step")?
        };

        Ok(Step {
            index,
            goal,
            instructions,
            directives,
            condition,
            optional,
        })
    }

    /// Parse directive content until `</closing>`.
    fn parse_body(&mut self, closing: &str) -> Result<(String, Vec<Directive>), WorkflowError> {
        let body_start = self.pos;
        let close_tag = format!("</{closing}>");
        let mut text = String::new();
        let mut directives = Vec::new();

        loop {
            let Some(lt) = self.rest().find('<') else {
                return Err(self.error(body_start, format!("missing {close_tag}")));
            };
            text.push_str(&self.rest()[..lt]);
            self.pos += lt;

            if self.rest().starts_with(&close_tag) {
                self.pos += close_tag.len();
                return Ok((normalize_text(&text), directives));
            }

            let name: String = self.rest()[1..]
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
                .collect();

            match name.as_str() {
                "step" => {
                    return Err(self.error(self.pos, "<step> blocks cannot be nested"));
                }
                "action" | "ask" | "check" | "goto" | "invoke-workflow" | "invoke-task"
                | "template-output" => {
                    directives.push(self.parse_directive()?);
                }
                _ => {
                    text.push('<');
                    self.pos += 1;
                }
            }
        }
    }

    /// Raw text content up to `</name>`.
    fn raw_content(&mut self, name: &str, start: usize) -> Result<String, WorkflowError> {
        let close_tag = format!("</{name}>");
        let Some(end) = self.rest().find(&close_tag) else {
            return Err(self.error(start, format!("missing {close_tag}")));
        };
        let content = self.rest()[..end].trim().to_string();
        self.pos += end + close_tag.len();
        Ok(content)
    }

    fn parse_directive(&mut self) -> Result<Directive, WorkflowError> {
        let start = self.pos;
        let tag = self.parse_open_tag()?;

        let directive = match tag.name.as_str() {
            "action" => {
                let text = if tag.self_closing {
                    String::new()
                } else {
                    self.raw_content("action", start)?
                };
                let assignments = match tag.attrs.get("set") {
                    Some(spec) => parse_assignments(spec).map_err(|m| self.error(start, m))?,
                    None => Vec::new(),
                };
                if text.is_empty() && assignments.is_empty() {
                    return Err(self.error(start, "<action> needs text or a set attribute"));
                }
                Directive::Action { text, assignments }
            }
            "ask" => {
                let agent = required(&tag, "agent", self, start)?;
                let store_as = tag
                    .attrs
                    .get("store")
                    .cloned()
                    .unwrap_or_else(|| "response".to_string());
                let prompt = if tag.self_closing {
                    String::new()
                } else {
                    self.raw_content("ask", start)?
                };
                if prompt.is_empty() {
                    return Err(self.error(start, "<ask> needs a prompt"));
                }
                Directive::Ask { agent, prompt, store_as }
            }
            "check" => {
                let condition = required(&tag, "if", self, start)?;
                validate_condition(&condition, tag.line)?;
                let body = if tag.self_closing {
                    Vec::new()
                } else {
                    self.parse_body("check")?.1
                };
                Directive::Check { condition, body }
            }
            "goto" => {
                let target = required(&tag, "step", self, start)?;
                let step = target
                    .parse()
                    .map_err(|_| self.error(start, format!("goto target '{target}' is not a step number")))?;
                self.skip_closing(&tag, start)?;
                Directive::Goto { step }
            }
            "invoke-workflow" | "invoke-task" => {
                let path = PathBuf::from(required(&tag, "path", self, start)?);
                let inputs = match tag.attrs.get("inputs") {
                    Some(spec) => parse_inputs(spec).map_err(|m| self.error(start, m))?,
                    None => BTreeMap::new(),
                };
                self.skip_closing(&tag, start)?;
                if tag.name == "invoke-workflow" {
                    Directive::InvokeWorkflow { path, inputs }
                } else {
                    Directive::InvokeTask { path, inputs }
                }
            }
            "template-output" => {
                let section = required(&tag, "section", self, start)?;
                self.skip_closing(&tag, start)?;
                Directive::TemplateOutput { section }
            }
            other => return Err(self.error(start, format!("unknown directive <{other}>"))),
        };

        Ok(directive)
    }

    /// Consume an empty `</name>` after a non-self-closing leaf tag.
    fn skip_closing(&mut self, tag: &Tag, start: usize) -> Result<(), WorkflowError> {
        if tag.self_closing {
            return Ok(());
        }
        let content = self.raw_content(&tag.name, start)?;
        if !content.is_empty() {
            return Err(self.error(start, format!("<{}> does not take content", tag.name)));
        }
        Ok(())
    }
}

fn required(
    tag: &Tag,
    key: &str,
    scanner: &Scanner<'_>,
    start: usize,
) -> Result<String, WorkflowError> {
    match tag.attrs.get(key) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(scanner.error(start, format!("<{}> requires a '{key}' attribute", tag.name))),
    }
}

fn parse_bool(
    tag: &Tag,
    key: &str,
    scanner: &Scanner<'_>,
    start: usize,
) -> Result<bool, WorkflowError> {
    match tag.attrs.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if v == "true" => Ok(true),
        Some(v) if v == "false" => Ok(false),
        Some(v) => Err(scanner.error(start, format!("'{key}' must be true or false, got '{v}'"))),
    }
}

fn validate_condition(source: &str, line: usize) -> Result<(), WorkflowError> {
    Condition::parse(source)
        .map(|_| ())
        .map_err(|e| WorkflowError::Instructions {
            line,
            message: e.to_string(),
        })
}

/// `x=1; name=draft` -> assignments. Values parse as JSON when they can.
fn parse_assignments(spec: &str) -> Result<Vec<Assignment>, String> {
    split_pairs(spec)?
        .into_iter()
        .map(|(name, raw)| {
            let value = serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
            Ok(Assignment { name, value })
        })
        .collect()
}

/// `topic=x; scope={{ y }}` -> input expressions, resolved at run time.
fn parse_inputs(spec: &str) -> Result<BTreeMap<String, String>, String> {
    Ok(split_pairs(spec)?.into_iter().collect())
}

fn split_pairs(spec: &str) -> Result<Vec<(String, String)>, String> {
    spec.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("expected name=value, got '{pair}'"))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(format!("missing name in '{pair}'"));
            }
            Ok((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Trim each line and drop blank runs at the ends.
fn normalize_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DOC: &str = r#"
# Create PRD

Some prose that is ignored.

<step n="1" goal="Set up" if="inputs.ready == true">
  Plain instruction text.
  <action set="x=1; phase=discovery">Record the starting point</action>
  <ask agent="analyst" store="summary">Summarise {{ x }}</ask>
</step>

<step n="2" goal="Review" optional="true">
  <check if="summary != null">
    <template-output section="overview"/>
    <goto step="1"/>
  </check>
  <invoke-workflow path="sub/workflow.yaml" inputs="topic=x; scope={{ phase }}"/>
  <invoke-task path="tasks/review.md"/>
</step>
"#;

    #[test]
    fn parses_steps_and_directives() {
        let steps = parse_instructions(DOC).unwrap();
        assert_eq!(steps.len(), 2);

        let first = &steps[0];
        assert_eq!(first.index, 0);
        assert_eq!(first.goal, "Set up");
        assert_eq!(first.instructions, "Plain instruction text.");
        assert_eq!(first.condition.as_deref(), Some("inputs.ready == true"));
        assert!(!first.optional);
        assert_eq!(
            first.directives[0],
            Directive::Action {
                text: "Record the starting point".to_string(),
                assignments: vec![
                    Assignment { name: "x".to_string(), value: json!(1) },
                    Assignment { name: "phase".to_string(), value: json!("discovery") },
                ],
            }
        );
        assert_eq!(
            first.directives[1],
            Directive::Ask {
                agent: "analyst".to_string(),
                prompt: "Summarise {{ x }}".to_string(),
                store_as: "summary".to_string(),
            }
        );

        let second = &steps[1];
        assert!(second.optional);
        let Directive::Check { condition, body } = &second.directives[0] else {
            panic!("expected check directive");
        };
        assert_eq!(condition, "summary != null");
        assert_eq!(body.len(), 2);
        assert_eq!(body[1], Directive::Goto { step: 1 });

        let Directive::InvokeWorkflow { path, inputs } = &second.directives[1] else {
            panic!("expected invoke-workflow directive");
        };
        assert_eq!(path, &PathBuf::from("sub/workflow.yaml"));
        assert_eq!(inputs["scope"], "{{ phase }}");
        assert!(matches!(second.directives[2], Directive::InvokeTask { .. }));
    }

    #[test]
    fn ask_store_defaults_to_response() {
        let doc = r#"<step n="1" goal="g"><ask agent="dev">Do it</ask></step>"#;
        let steps = parse_instructions(doc).unwrap();
        assert!(matches!(
            &steps[0].directives[0],
            Directive::Ask { store_as, .. } if store_as == "response"
        ));
    }

    #[test]
    fn unknown_tags_are_kept_as_text() {
        let doc = r#"<step n="1" goal="g">Use <b>bold</b> text</step>"#;
        let steps = parse_instructions(doc).unwrap();
        assert_eq!(steps[0].instructions, "Use <b>bold</b> text");
        assert!(steps[0].directives.is_empty());
    }

    #[test]
    fn entities_in_attributes_are_decoded() {
        let doc = r#"<step n="1" goal="g" if="name == &quot;a&quot;"></step>"#;
        let steps = parse_instructions(doc).unwrap();
        assert_eq!(steps[0].condition.as_deref(), Some(r#"name == "a""#));
    }

    #[test]
    fn rejects_goto_outside_document() {
        let doc = r#"<step n="1" goal="g"><goto step="3"/></step>"#;
        assert!(matches!(parse_instructions(doc), Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn rejects_unconditional_self_goto() {
        let doc = r#"<step n="1" goal="g"><goto step="1"/></step>"#;
        assert!(matches!(parse_instructions(doc), Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn allows_guarded_self_goto() {
        let doc = r#"<step n="1" goal="g"><check if="retry"><goto step="1"/></check></step>"#;
        assert!(parse_instructions(doc).is_ok());
    }

    #[test]
    fn rejects_bad_condition_with_line_number() {
        let doc = "intro\n\n<step n=\"1\" goal=\"g\" if=\"a ==\"></step>";
        match parse_instructions(doc) {
            Err(WorkflowError::Instructions { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected instructions error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_structural_errors() {
        for doc in [
            "no steps here",
            r#"<step n="2" goal="g"></step>"#,
            r#"<step n="1"></step>"#,
            r#"<step n="1" goal="g"><ask agent="a">never closed</step>"#,
            r#"<step n="1" goal="g"><step n="2" goal="h"></step></step>"#,
            r#"<step n="1" goal="g" optional="maybe"></step>"#,
            r#"<step n="1" goal=g></step>"#,
            r#"<step n="1" goal="g"><action/></step>"#,
            r#"<step n="1" goal="g">unterminated"#,
        ] {
            assert!(parse_instructions(doc).is_err(), "expected error for {doc:?}");
        }
    }
}
