//! Worker adapter implementations.
//!
//! Spawns agent CLI processes (`claude`, `codex`) to execute prompts.

pub mod claude;
pub mod codex;
pub mod mock;

pub use claude::ClaudeWorker;
pub use codex::CodexWorker;
pub use mock::{MockWorker, ScriptedReply};

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

use crate::domain::models::{AgentSpec, Provider, WorkerConfig};
use crate::domain::ports::{Worker, WorkerError, WorkerRequest, WorkerResult};

/// Registry routing invocations to the provider-specific worker.
pub struct WorkerRegistry {
    claude: ClaudeWorker,
    codex: CodexWorker,
}

impl WorkerRegistry {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            claude: ClaudeWorker::new(config.clone()),
            codex: CodexWorker::new(config),
        }
    }
}

#[async_trait]
impl Worker for WorkerRegistry {
    async fn invoke(&self, agent: &AgentSpec, request: WorkerRequest) -> WorkerResult {
        match agent.provider {
            Provider::Anthropic => self.claude.invoke(agent, request).await,
            Provider::Openai => self.codex.invoke(agent, request).await,
        }
    }
}

/// Raw capture of a finished subprocess.
pub(crate) struct CapturedOutput {
    pub stdout: String,
    pub stdout_truncated: bool,
}

/// Run a prepared command to completion with a timeout and capped capture.
///
/// The child is killed when the timeout expires. Capture keeps draining past
/// the cap so the child never blocks on a full pipe; overflow is discarded
/// and recorded as truncation.
pub(crate) async fn run_command(
    mut cmd: Command,
    program: &str,
    timeout_secs: u64,
    max_output_bytes: usize,
) -> Result<CapturedOutput, WorkerError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| WorkerError::Spawn {
        program: program.to_string(),
        message: e.to_string(),
    })?;

    let stdout = child.stdout.take().ok_or_else(|| WorkerError::Spawn {
        program: program.to_string(),
        message: "failed to capture stdout".to_string(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| WorkerError::Spawn {
        program: program.to_string(),
        message: "failed to capture stderr".to_string(),
    })?;

    let stdout_task = tokio::spawn(read_capped(stdout, max_output_bytes));
    let stderr_task = tokio::spawn(read_capped(stderr, max_output_bytes));

    let status = match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
        Ok(result) => result?,
        Err(_) => {
            let _ = child.start_kill();
            return Err(WorkerError::Timeout { timeout_secs });
        }
    };

    let (stdout_buf, stdout_truncated) = stdout_task.await.unwrap_or_default();
    let (stderr_buf, _) = stderr_task.await.unwrap_or_default();

    let stdout = String::from_utf8_lossy(&stdout_buf).into_owned();

    if stdout_truncated {
        warn!(program, cap = max_output_bytes, "worker stdout truncated at buffer cap");
    }

    if !status.success() {
        return Err(WorkerError::Failed {
            exit_code: status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
        });
    }

    Ok(CapturedOutput {
        stdout,
        stdout_truncated,
    })
}

/// Read a stream into memory up to `cap` bytes, draining the rest.
async fn read_capped<R>(mut reader: R, cap: usize) -> (Vec<u8>, bool)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < cap {
                    let take = n.min(cap - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }
    (buf, truncated)
}
