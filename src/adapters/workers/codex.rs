//! OpenAI worker: the `codex` CLI.

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use super::run_command;
use crate::domain::models::{AgentSpec, WorkerConfig};
use crate::domain::ports::{Worker, WorkerReply, WorkerRequest, WorkerResult};

/// Returned when the event stream carries no agent message.
const NO_RESPONSE_FALLBACK: &str = "The agent produced no response.";

/// Worker that shells out to `codex exec`.
///
/// Stdout is a JSONL event stream; the response is the `text` of the last
/// `item.completed` event whose item is an `agent_message`.
pub struct CodexWorker {
    config: WorkerConfig,
}

impl CodexWorker {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, agent: &AgentSpec, request: &WorkerRequest) -> Vec<String> {
        let mut args = vec!["exec".to_string()];

        if !request.fresh_conversation {
            args.push("resume".to_string());
            args.push("--last".to_string());
        }

        if !agent.model.is_empty() {
            args.push("--model".to_string());
            args.push(agent.model.clone());
        }

        args.push("--skip-git-repo-check".to_string());
        args.push("--dangerously-bypass-approvals-and-sandbox".to_string());
        args.push("--json".to_string());
        args.push(request.prompt.clone());

        args
    }

    /// Pull the final agent message out of the JSONL event stream.
    fn parse_response(stdout: &str) -> String {
        let mut last_message: Option<String> = None;

        for line in stdout.lines() {
            let Ok(event) = serde_json::from_str::<Value>(line) else {
                continue;
            };
            if event.get("type").and_then(Value::as_str) != Some("item.completed") {
                continue;
            }
            let Some(item) = event.get("item") else {
                continue;
            };
            if item.get("type").and_then(Value::as_str) != Some("agent_message") {
                continue;
            }
            if let Some(text) = item.get("text").and_then(Value::as_str) {
                last_message = Some(text.to_string());
            }
        }

        last_message.unwrap_or_else(|| NO_RESPONSE_FALLBACK.to_string())
    }
}

#[async_trait]
impl Worker for CodexWorker {
    async fn invoke(&self, agent: &AgentSpec, request: WorkerRequest) -> WorkerResult {
        let args = self.build_args(agent, &request);

        let mut cmd = Command::new(&self.config.codex_binary);
        cmd.args(&args).current_dir(&request.working_dir);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let captured = run_command(
            cmd,
            &self.config.codex_binary,
            self.config.timeout_secs,
            self.config.max_output_bytes,
        )
        .await?;

        Ok(WorkerReply {
            text: Self::parse_response(&captured.stdout),
            truncated: captured.stdout_truncated,
        })
    }
}
