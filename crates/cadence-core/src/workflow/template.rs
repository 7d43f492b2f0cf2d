//! `{{ path }}` substitution against the run's variables.
//!
//! Unknown references are left as-is (not an error), so a prompt can carry
//! literal braces meant for the agent.

use std::collections::BTreeMap;

use cadence_types::variables::Variables;
use serde_json::Value;

/// Replace every `{{ path }}` in `template` with the variable's string form.
///
/// Whitespace inside the braces is optional. Strings are inserted verbatim;
/// other JSON values are inserted in compact JSON form.
pub fn resolve_template(template: &str, variables: &Variables) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            result.push_str(&rest[start..]);
            return result;
        };

        let path = after_open[..end].trim();
        match variables.get_path(path) {
            Some(value) if is_reference(path) => result.push_str(&value_to_string(value)),
            _ => result.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after_open[end + 2..];
    }

    result.push_str(rest);
    result
}

/// Resolve each input expression of a sub-workflow invocation.
///
/// An input whose whole text is a single reference keeps the referenced
/// JSON value (objects stay objects); anything else becomes a string.
pub fn resolve_inputs(inputs: &BTreeMap<String, String>, variables: &Variables) -> Variables {
    inputs
        .iter()
        .map(|(name, expr)| {
            let trimmed = expr.trim();
            let value = single_reference(trimmed)
                .and_then(|path| variables.get_path(path).cloned())
                .or_else(|| {
                    // Bare paths (`topic=x`) resolve like references.
                    is_reference(trimmed)
                        .then(|| variables.get_path(trimmed).cloned())
                        .flatten()
                })
                .unwrap_or_else(|| Value::String(resolve_template(trimmed, variables)));
            (name.clone(), value)
        })
        .collect()
}

fn single_reference(text: &str) -> Option<&str> {
    let inner = text.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

fn is_reference(path: &str) -> bool {
    !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Convert a JSON value to the string inserted into text.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> Variables {
        let mut vars = Variables::new();
        vars.set("x", json!("alpha"));
        vars.set("n", json!(42));
        vars.set("inputs", json!({ "topic": "billing", "tags": ["a", "b"] }));
        vars
    }

    #[test]
    fn substitutes_with_and_without_spaces() {
        let v = vars();
        assert_eq!(resolve_template("Summarise {{ x }}", &v), "Summarise alpha");
        assert_eq!(resolve_template("{{x}}-{{n}}", &v), "alpha-42");
        assert_eq!(resolve_template("{{ inputs.topic }}", &v), "billing");
    }

    #[test]
    fn non_strings_render_as_compact_json() {
        let v = vars();
        assert_eq!(resolve_template("{{ inputs.tags }}", &v), r#"["a","b"]"#);
    }

    #[test]
    fn unknown_references_stay_verbatim() {
        let v = vars();
        assert_eq!(resolve_template("keep {{ missing }} here", &v), "keep {{ missing }} here");
        assert_eq!(resolve_template("open {{ x", &v), "open {{ x");
        assert_eq!(resolve_template("{{ not a path }}", &v), "{{ not a path }}");
    }

    #[test]
    fn resolve_inputs_keeps_structured_values() {
        let v = vars();
        let mut inputs = BTreeMap::new();
        inputs.insert("topic".to_string(), "inputs.topic".to_string());
        inputs.insert("all".to_string(), "{{ inputs }}".to_string());
        inputs.insert("label".to_string(), "topic: {{ inputs.topic }}".to_string());
        inputs.insert("literal".to_string(), "plain".to_string());

        let resolved = resolve_inputs(&inputs, &v);
        assert_eq!(resolved.get("topic"), Some(&json!("billing")));
        assert_eq!(resolved.get_path("all.topic"), Some(&json!("billing")));
        assert_eq!(resolved.get("label"), Some(&json!("topic: billing")));
        assert_eq!(resolved.get("literal"), Some(&json!("plain")));
    }
}
