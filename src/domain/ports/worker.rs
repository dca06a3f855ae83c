//! Worker port - interface for agent CLI backends.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::models::AgentSpec;

/// One worker subprocess invocation.
///
/// Environment values are passed via explicit environment, never argv, so
/// secrets do not surface in process listings.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    /// Full prompt, memory context already prepended.
    pub prompt: String,

    /// Resolved working directory for the subprocess.
    pub working_dir: PathBuf,

    /// Start a fresh conversation instead of continuing prior session state.
    pub fresh_conversation: bool,

    /// Extra environment for the subprocess.
    pub env: HashMap<String, String>,
}

impl WorkerRequest {
    pub fn new(prompt: impl Into<String>, working_dir: PathBuf) -> Self {
        Self {
            prompt: prompt.into(),
            working_dir,
            fresh_conversation: false,
            env: HashMap::new(),
        }
    }

    #[must_use]
    pub fn fresh(mut self) -> Self {
        self.fresh_conversation = true;
        self
    }
}

/// Successful worker output.
#[derive(Debug, Clone)]
pub struct WorkerReply {
    pub text: String,

    /// Captured stdout hit the per-invocation buffer cap.
    pub truncated: bool,
}

impl WorkerReply {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            truncated: false,
        }
    }
}

/// Error types for worker invocation.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker binary could not be started at all.
    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    /// The subprocess exited non-zero.
    #[error("Worker exited with status {exit_code}: {stderr}")]
    Failed { exit_code: i32, stderr: String },

    /// The subprocess exceeded the configured timeout and was killed.
    #[error("Worker timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Unknown provider or an agent misconfiguration.
    #[error("Unrecognized provider for agent {agent_id}")]
    UnknownProvider { agent_id: String },

    #[error("Worker I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Terminal errors must not be retried; transient ones may be, where a
    /// retry budget exists (swarm batches).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Spawn { .. } | Self::UnknownProvider { .. })
    }
}

pub type WorkerResult = Result<WorkerReply, WorkerError>;

/// Trait for agent worker backends.
///
/// A worker launches the agent's CLI as a subprocess in the agent's working
/// directory and returns the textual response. Implementations must be safe
/// to call concurrently for distinct agents; per-agent serialization is the
/// dispatcher's job.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn invoke(&self, agent: &AgentSpec, request: WorkerRequest) -> WorkerResult;
}
