//! Command-line model clients.
//!
//! Each provider is reached through a local CLI (`claude --print` by
//! default): the prompt goes to the child's stdin and its stdout is the
//! response. Clients are stateless; a fresh process runs per call and is
//! killed when the call is dropped or times out.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use cadence_core::agent::{
    BoxModelClient, ModelClient, ModelClientFactory, ModelError, ModelRequest, ModelResponse,
};
use cadence_types::agent::ModelAssignment;
use cadence_types::config::ProviderCommand;
use tokio::io::AsyncWriteExt;

/// Placeholder in provider arguments replaced with the assigned model.
const MODEL_PLACEHOLDER: &str = "{model}";

/// Built-in command for the `claude` provider.
fn default_claude_command() -> ProviderCommand {
    ProviderCommand {
        program: "claude".to_string(),
        args: vec![
            "--print".to_string(),
            "--model".to_string(),
            MODEL_PLACEHOLDER.to_string(),
        ],
        timeout_secs: 600,
    }
}

/// One provider process invocation per `complete` call.
#[derive(Debug, Clone)]
pub struct CommandClient {
    name: String,
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandClient {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        args: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            timeout,
        }
    }

    fn stdin_payload(request: &ModelRequest) -> String {
        if request.system.trim().is_empty() {
            request.prompt.clone()
        } else {
            format!("{}\n\n---\n\n{}", request.system.trim_end(), request.prompt)
        }
    }
}

impl ModelClient for CommandClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ModelError::NotFound(format!(
                    "provider command '{}' is not installed",
                    self.program
                )),
                _ => ModelError::Io(format!("failed to spawn '{}': {e}", self.program)),
            })?;

        // Feed stdin concurrently so a chatty child cannot fill its stdout
        // pipe while we are still writing.
        let payload = Self::stdin_payload(request);
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                let result = stdin.write_all(payload.as_bytes()).await;
                drop(stdin);
                result
            })
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                ModelError::Timeout(format!(
                    "'{}' did not finish within {}s",
                    self.program,
                    self.timeout.as_secs_f64()
                ))
            })?
            .map_err(|e| ModelError::Io(format!("failed to wait for '{}': {e}", self.program)))?;

        if let Some(writer) = writer {
            match writer.await {
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    return Err(ModelError::Io(format!("failed to write prompt: {e}")));
                }
                _ => {}
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            let lowered = detail.to_lowercase();
            if lowered.contains("rate limit") || lowered.contains("429") {
                return Err(ModelError::RateLimited(detail.to_string()));
            }
            return Err(ModelError::Provider(format!(
                "'{}' exited with {}: {detail}",
                self.program, output.status
            )));
        }

        let text = String::from_utf8(output.stdout)
            .map_err(|_| ModelError::InvalidResponse("output is not valid UTF-8".to_string()))?;
        let text = text.trim_end();
        if text.trim().is_empty() {
            return Err(ModelError::InvalidResponse(format!(
                "'{}' returned an empty response",
                self.program
            )));
        }
        Ok(ModelResponse::text(text))
    }
}

/// Builds [`CommandClient`]s from the project's provider commands.
#[derive(Debug, Clone, Default)]
pub struct CommandClientFactory {
    providers: BTreeMap<String, ProviderCommand>,
}

impl CommandClientFactory {
    pub fn new(providers: BTreeMap<String, ProviderCommand>) -> Self {
        Self { providers }
    }

    fn command_for(&self, provider: &str) -> Option<ProviderCommand> {
        self.providers
            .get(provider)
            .cloned()
            .or_else(|| (provider == "claude").then(default_claude_command))
    }
}

impl ModelClientFactory for CommandClientFactory {
    fn create(&self, assignment: &ModelAssignment) -> Result<BoxModelClient, ModelError> {
        let command = self.command_for(&assignment.provider).ok_or_else(|| {
            ModelError::Configuration(format!(
                "no command configured for provider '{}'",
                assignment.provider
            ))
        })?;

        let args = command
            .args
            .iter()
            .map(|arg| arg.replace(MODEL_PLACEHOLDER, &assignment.model))
            .collect();
        Ok(BoxModelClient::new(CommandClient::new(
            format!("{}-cli", assignment.provider),
            command.program,
            args,
            Duration::from_secs(command.timeout_secs),
        )))
    }
}
