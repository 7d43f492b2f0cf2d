//! CLI command definitions for the `cadence` binary.

pub mod run;
pub mod status;

use std::path::PathBuf;

use anyhow::{Result, bail};
use cadence_types::escalation::EscalationDecision;
use cadence_types::variables::Variables;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use serde_json::Value;

/// Drive agent workflows with checkpoints, retries and human escalation.
#[derive(Parser)]
#[command(name = "cadence", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Project directory containing cadence.toml.
    #[arg(long, global = true, default_value = ".", env = "CADENCE_PROJECT_DIR")]
    pub project: PathBuf,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new run of a workflow definition or task file.
    Run {
        /// Workflow YAML or task markdown.
        definition: PathBuf,

        /// Initial variable, `key=value`. Values are parsed as JSON when
        /// possible. Repeatable.
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },

    /// Continue the project's latest run.
    ///
    /// Answers the pending escalation when there is one, re-runs the failed
    /// step of an errored run, and otherwise resumes from the last checkpoint.
    Resume {
        /// The workflow the run was started from.
        definition: PathBuf,

        /// Answer to the pending escalation.
        #[arg(long)]
        answer: Option<String>,

        /// How to continue past the escalated step.
        #[arg(long, default_value = "proceed", value_name = "proceed|skip|abort")]
        decision: EscalationDecision,

        /// Variable to merge before resuming, `key=value`. Repeatable.
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },

    /// Show where the project stands.
    Status,

    /// Show one task: an agent task UUID or a 1-based step number.
    Task {
        id: String,
    },

    /// List queued escalations for the project.
    Escalations,

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

/// Parse repeated `key=value` arguments into variables.
///
/// Dotted keys address nested objects (`inputs.clarity=low`).
pub fn parse_vars(pairs: &[String]) -> Result<Variables> {
    let mut variables = Variables::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("invalid variable '{pair}', expected KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("invalid variable '{pair}', key is empty");
        }
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        variables.set_path(key, value);
    }
    Ok(variables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vars_are_json_with_string_fallback() {
        let vars = parse_vars(&[
            "count=3".to_string(),
            "ready=true".to_string(),
            "inputs.clarity=low".to_string(),
            "title=Billing v2".to_string(),
        ])
        .unwrap();
        assert_eq!(vars.get("count"), Some(&json!(3)));
        assert_eq!(vars.get("ready"), Some(&json!(true)));
        assert_eq!(vars.get_path("inputs.clarity"), Some(&json!("low")));
        assert_eq!(vars.get("title"), Some(&json!("Billing v2")));
    }

    #[test]
    fn malformed_vars_are_rejected() {
        assert!(parse_vars(&["no-equals".to_string()]).is_err());
        assert!(parse_vars(&["=value".to_string()]).is_err());
    }

    #[test]
    fn cli_parses_resume_decision() {
        let cli = Cli::try_parse_from([
            "cadence",
            "resume",
            "prd.yaml",
            "--decision",
            "skip",
            "--var",
            "x=1",
        ])
        .unwrap();
        match cli.command {
            Commands::Resume { decision, vars, .. } => {
                assert_eq!(decision, EscalationDecision::Skip);
                assert_eq!(vars, vec!["x=1".to_string()]);
            }
            _ => panic!("expected resume"),
        }
    }
}
