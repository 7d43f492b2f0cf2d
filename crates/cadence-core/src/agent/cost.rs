//! Cost estimation for agent invocations.
//!
//! Costs come from per-million-token rates: project overrides from
//! `cadence.toml` first, then a small built-in table. Estimates are
//! approximate and always displayed with a `~`.

use cadence_types::agent::ModelPricing;

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Rate {
    input: f64,
    output: f64,
}

impl Rate {
    fn cost(self, input_tokens: u32, output_tokens: u32) -> f64 {
        (f64::from(input_tokens) * self.input + f64::from(output_tokens) * self.output) / 1_000_000.0
    }
}

/// Used when neither the project nor the built-in table knows the model.
const FALLBACK_RATE: Rate = Rate {
    input: 5.0,
    output: 15.0,
};

/// `(provider, model prefix, input, output)`, most specific prefix first.
const BUILTIN_RATES: &[(&str, &str, f64, f64)] = &[
    ("claude", "claude-opus-4", 15.0, 75.0),
    ("claude", "claude-sonnet-4", 3.0, 15.0),
    ("claude", "claude-haiku-4", 1.0, 5.0),
    ("codex", "gpt-5", 1.25, 10.0),
    ("codex", "o3", 2.0, 8.0),
    ("gemini", "gemini-2.5-pro", 1.25, 10.0),
];

/// Rough token estimate for text whose usage the client did not report.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as u32).div_ceil(4)
}

fn rate_for(model: &str, provider: &str, overrides: &[ModelPricing]) -> Rate {
    let configured = overrides
        .iter()
        .find(|p| p.provider == provider && model.starts_with(&p.model_pattern))
        .map(|p| Rate {
            input: p.input_cost_per_million,
            output: p.output_cost_per_million,
        });
    configured
        .or_else(|| {
            BUILTIN_RATES
                .iter()
                .find(|(p, prefix, ..)| *p == provider && model.starts_with(prefix))
                .map(|&(_, _, input, output)| Rate { input, output })
        })
        .unwrap_or(FALLBACK_RATE)
}

/// Estimate the cost of a call in USD.
///
/// Lookup order: project overrides, the built-in table, then the fallback.
/// Models match by prefix (`claude-sonnet-4` matches `claude-sonnet-4-5`).
pub fn estimate_cost(
    input_tokens: u32,
    output_tokens: u32,
    model: &str,
    provider: &str,
    overrides: &[ModelPricing],
) -> f64 {
    rate_for(model, provider, overrides).cost(input_tokens, output_tokens)
}

/// Format a cost estimate, prefixed with `~` to mark it approximate.
pub fn format_cost(cost: f64) -> String {
    if cost < 0.01 {
        format!("~${cost:.3}")
    } else {
        format!("~${cost:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_uses_table() {
        let cost = estimate_cost(1_000_000, 100_000, "claude-sonnet-4-5", "claude", &[]);
        assert!((cost - 4.50).abs() < 0.001, "got {cost}");
    }

    #[test]
    fn override_takes_priority() {
        let overrides = vec![ModelPricing {
            provider: "claude".to_string(),
            model_pattern: "claude-sonnet-4".to_string(),
            input_cost_per_million: 1.0,
            output_cost_per_million: 5.0,
        }];
        let cost = estimate_cost(1_000_000, 100_000, "claude-sonnet-4-5", "claude", &overrides);
        assert!((cost - 1.50).abs() < 0.001, "got {cost}");
    }

    #[test]
    fn unknown_model_uses_fallback() {
        let cost = estimate_cost(1_000_000, 100_000, "mystery", "nobody", &[]);
        assert!((cost - 6.50).abs() < 0.001, "got {cost}");
    }

    #[test]
    fn token_estimate_is_chars_over_four() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn format_cost_precision() {
        assert_eq!(format_cost(0.001), "~$0.001");
        assert_eq!(format_cost(1.5), "~$1.50");
    }
}
