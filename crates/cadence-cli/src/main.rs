//! Cadence CLI entry point.
//!
//! Binary name: `cadence`
//!
//! Parses arguments, loads the project configuration, wires the kernel and
//! dispatches to the command handlers.

mod cli;
mod state;

use anyhow::anyhow;
use cadence_observe::tracing_setup::{LogFormat, TracingOptions, init_tracing, shutdown_tracing};
use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,cadence_core=debug,cadence_infra=debug",
        _ => "trace",
    };
    init_tracing(&TracingOptions {
        default_filter: Some(filter.to_string()),
        format: if cli.log_json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
        enable_otel: cli.otel,
    })
    .map_err(|e| anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need a project
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "cadence", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init(&cli.project).await?;

    let result = match cli.command {
        Commands::Run { definition, vars } => {
            cli::run::run(&state, &definition, &vars, cli.json).await
        }
        Commands::Resume {
            definition,
            answer,
            decision,
            vars,
        } => cli::run::resume(&state, &definition, answer, decision, &vars, cli.json).await,
        Commands::Status => cli::status::status(&state, cli.json).await,
        Commands::Task { id } => cli::status::task(&state, &id, cli.json).await,
        Commands::Escalations => cli::status::escalations(&state, cli.json).await,
        Commands::Completions { .. } => unreachable!("handled above"),
    };

    shutdown_tracing();
    result
}
