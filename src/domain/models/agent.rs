//! Agent and team configuration records.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which worker CLI backs an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// The `claude` CLI.
    Anthropic,
    /// The `codex` CLI.
    Openai,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured worker identity.
///
/// The `id` set is the keyspace used for per-agent serialization in the
/// dispatcher; ids follow the routing grammar `[a-z][a-z0-9_-]*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: String,

    pub name: String,

    pub provider: Provider,

    /// Opaque model identifier passed through to the worker CLI.
    pub model: String,

    /// Absolute, or relative to the workspace root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
}

impl AgentSpec {
    /// Resolve the agent's working directory against the workspace root.
    pub fn resolved_working_dir(&self, workspace_root: &Path) -> PathBuf {
        match &self.working_directory {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => workspace_root.join(dir),
            None => workspace_root.to_path_buf(),
        }
    }
}

/// A named group of agents with a designated leader.
///
/// Messages addressed to the team enter at the leader; every id referenced
/// must exist in the agent table (enforced at config load).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSpec {
    pub id: String,

    pub name: String,

    pub agents: Vec<String>,

    pub leader_agent: String,
}

impl TeamSpec {
    /// Teammates of `agent_id` within this team, in roster order.
    pub fn teammates_of(&self, agent_id: &str) -> Vec<String> {
        self.agents
            .iter()
            .filter(|id| id.as_str() != agent_id)
            .cloned()
            .collect()
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.iter().any(|id| id == agent_id)
    }
}
