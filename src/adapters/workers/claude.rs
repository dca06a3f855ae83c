//! Anthropic worker: the `claude` CLI.

use async_trait::async_trait;
use tokio::process::Command;

use super::run_command;
use crate::domain::models::{AgentSpec, WorkerConfig};
use crate::domain::ports::{Worker, WorkerReply, WorkerRequest, WorkerResult};

/// Worker that shells out to the `claude` CLI.
///
/// Stdout is the response text. Conversation continuity uses `-c`; a fresh
/// conversation simply omits it.
pub struct ClaudeWorker {
    config: WorkerConfig,
}

impl ClaudeWorker {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, agent: &AgentSpec, request: &WorkerRequest) -> Vec<String> {
        let mut args = vec!["--dangerously-skip-permissions".to_string()];

        if !agent.model.is_empty() {
            args.push("--model".to_string());
            args.push(agent.model.clone());
        }

        if !request.fresh_conversation {
            args.push("-c".to_string());
        }

        args.push("-p".to_string());
        args.push(request.prompt.clone());

        args
    }
}

#[async_trait]
impl Worker for ClaudeWorker {
    async fn invoke(&self, agent: &AgentSpec, request: WorkerRequest) -> WorkerResult {
        let args = self.build_args(agent, &request);

        let mut cmd = Command::new(&self.config.claude_binary);
        cmd.args(&args).current_dir(&request.working_dir);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let captured = run_command(
            cmd,
            &self.config.claude_binary,
            self.config.timeout_secs,
            self.config.max_output_bytes,
        )
        .await?;

        Ok(WorkerReply {
            text: captured.stdout.trim_end().to_string(),
            truncated: captured.stdout_truncated,
        })
    }
}
