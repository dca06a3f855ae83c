//! Main configuration structure and the validated roster view.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use super::agent::{AgentSpec, TeamSpec};
use super::swarm::SwarmSpec;
use crate::domain::errors::{DomainError, DomainResult};

/// Main configuration for Switchboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Root of the file-queue workspace.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// Incoming-queue poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub agents: Vec<AgentSpec>,

    #[serde(default)]
    pub teams: Vec<TeamSpec>,

    #[serde(default)]
    pub swarms: Vec<SwarmSpec>,
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            poll_interval_ms: default_poll_interval_ms(),
            logging: LoggingConfig::default(),
            worker: WorkerConfig::default(),
            limits: LimitsConfig::default(),
            agents: vec![],
            teams: vec![],
            swarms: vec![],
        }
    }
}

impl Config {
    pub fn incoming_dir(&self) -> PathBuf {
        self.workspace_root.join("queue").join("incoming")
    }

    pub fn processing_dir(&self) -> PathBuf {
        self.workspace_root.join("queue").join("processing")
    }

    pub fn outgoing_dir(&self) -> PathBuf {
        self.workspace_root.join("queue").join("outgoing")
    }

    pub fn dead_letter_dir(&self) -> PathBuf {
        self.workspace_root.join("queue").join("dead-letter")
    }

    pub fn chats_dir(&self) -> PathBuf {
        self.workspace_root.join("chats")
    }

    pub fn events_dir(&self) -> PathBuf {
        self.workspace_root.join("events")
    }

    pub fn flags_dir(&self) -> PathBuf {
        self.workspace_root.join("flags")
    }

    pub fn files_dir(&self) -> PathBuf {
        self.workspace_root.join("files")
    }

    /// All directories the dispatcher expects to exist.
    pub fn queue_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.incoming_dir(),
            self.processing_dir(),
            self.outgoing_dir(),
            self.dead_letter_dir(),
            self.chats_dir(),
            self.events_dir(),
            self.flags_dir(),
            self.files_dir(),
        ]
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json or pretty.
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for log files; stdout only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Pretty
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
        }
    }
}

/// Worker subprocess configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    #[serde(default = "default_claude_binary")]
    pub claude_binary: String,

    #[serde(default = "default_codex_binary")]
    pub codex_binary: String,

    /// Per-invocation timeout; the subprocess is killed on expiry.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Cap on captured stdout per invocation.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_claude_binary() -> String {
    "claude".to_string()
}

fn default_codex_binary() -> String {
    "codex".to_string()
}

const fn default_timeout_secs() -> u64 {
    600
}

const fn default_max_output_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            claude_binary: default_claude_binary(),
            codex_binary: default_codex_binary(),
            timeout_secs: default_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

/// Resource bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LimitsConfig {
    /// Cap on resolved swarm items per job.
    #[serde(default = "default_max_swarm_items")]
    pub max_swarm_items: usize,

    /// Responses longer than this are truncated or attached as files.
    #[serde(default = "default_response_limit")]
    pub response_limit: usize,

    /// Rollbacks before a message file moves to the dead-letter directory.
    #[serde(default = "default_dead_letter_after")]
    pub dead_letter_after: u32,
}

const fn default_max_swarm_items() -> usize {
    10_000
}

const fn default_response_limit() -> usize {
    4000
}

const fn default_dead_letter_after() -> u32 {
    5
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_swarm_items: default_max_swarm_items(),
            response_limit: default_response_limit(),
            dead_letter_after: default_dead_letter_after(),
        }
    }
}

/// Validated, id-indexed view of the configured agents, teams, and swarms.
///
/// Built once at startup; executors resolve ids against it at dispatch time
/// rather than caching records.
#[derive(Debug, Clone)]
pub struct Roster {
    agents: HashMap<String, AgentSpec>,
    teams: HashMap<String, TeamSpec>,
    swarms: HashMap<String, SwarmSpec>,
    default_agent_id: String,
}

impl Roster {
    /// Index the configured records.
    ///
    /// The default agent is the one named `default` when present, else the
    /// first configured agent. Reference integrity is the config loader's
    /// responsibility; this only requires a non-empty agent table.
    pub fn from_config(config: &Config) -> DomainResult<Self> {
        let first = config
            .agents
            .first()
            .ok_or(DomainError::NoAgentsConfigured)?;

        let default_agent_id = config
            .agents
            .iter()
            .find(|a| a.id == "default")
            .map(|a| a.id.clone())
            .unwrap_or_else(|| first.id.clone());

        Ok(Self {
            agents: config
                .agents
                .iter()
                .map(|a| (a.id.clone(), a.clone()))
                .collect(),
            teams: config
                .teams
                .iter()
                .map(|t| (t.id.clone(), t.clone()))
                .collect(),
            swarms: config
                .swarms
                .iter()
                .map(|s| (s.id.clone(), s.clone()))
                .collect(),
            default_agent_id,
        })
    }

    pub fn agent(&self, id: &str) -> Option<&AgentSpec> {
        self.agents.get(id)
    }

    pub fn require_agent(&self, id: &str) -> DomainResult<&AgentSpec> {
        self.agents
            .get(id)
            .ok_or_else(|| DomainError::AgentNotFound(id.to_string()))
    }

    pub fn team(&self, id: &str) -> Option<&TeamSpec> {
        self.teams.get(id)
    }

    pub fn swarm(&self, id: &str) -> Option<&SwarmSpec> {
        self.swarms.get(id)
    }

    pub fn require_swarm(&self, id: &str) -> DomainResult<&SwarmSpec> {
        self.swarms
            .get(id)
            .ok_or_else(|| DomainError::SwarmNotFound(id.to_string()))
    }

    pub fn default_agent_id(&self) -> &str {
        &self.default_agent_id
    }

    pub fn agent_ids(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }
}
