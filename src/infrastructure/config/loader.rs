//! Configuration loading and validation.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use thiserror::Error;

use crate::domain::models::Config;

/// Ids reserved by the routing layer; none of the configured tables may use
/// them.
const RESERVED_IDS: &[&str] = &["error", "swarm", "default-or-first"];

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid id '{0}'. Ids must match [a-z][a-z0-9_-]*")]
    InvalidId(String),

    #[error("Reserved id '{0}' cannot be configured")]
    ReservedId(String),

    #[error("Duplicate id '{0}' across agents, teams, and swarms")]
    DuplicateId(String),

    #[error("Team '{0}' has no agents")]
    EmptyTeam(String),

    #[error("Team '{team}' references unknown agent '{agent}'")]
    UnknownTeamMember { team: String, agent: String },

    #[error("Team '{team}' leader '{leader}' is not a member")]
    LeaderNotInTeam { team: String, leader: String },

    #[error("Swarm '{swarm}' references unknown worker agent '{agent}'")]
    UnknownSwarmAgent { swarm: String, agent: String },

    #[error("Swarm '{swarm}' references unknown reduce agent '{agent}'")]
    UnknownReduceAgent { swarm: String, agent: String },

    #[error("Swarm '{0}' concurrency must be at least 1")]
    InvalidConcurrency(String),

    #[error("Swarm '{0}' batch_size must be at least 1")]
    InvalidBatchSize(String),

    #[error("Swarm '{0}' max_partition_size must be at least 1")]
    InvalidMaxPartitionSize(String),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("poll_interval_ms must be at least 1")]
    InvalidPollInterval,

    #[error("worker.max_output_bytes must be at least 1")]
    InvalidOutputCap,
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_-]*$").expect("id pattern"))
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. switchboard.yaml (workspace config)
    /// 3. switchboard.local.yaml (local overrides, optional)
    /// 4. Environment variables (SWITCHBOARD_* prefix)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file("switchboard.yaml"))
            .merge(Yaml::file("switchboard.local.yaml"))
            .merge(Env::prefixed("SWITCHBOARD_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate identifiers, reference integrity, and bounds.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        if config.worker.max_output_bytes == 0 {
            return Err(ConfigError::InvalidOutputCap);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let all_ids = config
            .agents
            .iter()
            .map(|a| a.id.as_str())
            .chain(config.teams.iter().map(|t| t.id.as_str()))
            .chain(config.swarms.iter().map(|s| s.id.as_str()));
        for id in all_ids {
            if !id_pattern().is_match(id) {
                return Err(ConfigError::InvalidId(id.to_string()));
            }
            if RESERVED_IDS.contains(&id) {
                return Err(ConfigError::ReservedId(id.to_string()));
            }
            if !seen.insert(id) {
                return Err(ConfigError::DuplicateId(id.to_string()));
            }
        }

        let agent_ids: HashSet<&str> = config.agents.iter().map(|a| a.id.as_str()).collect();

        for team in &config.teams {
            if team.agents.is_empty() {
                return Err(ConfigError::EmptyTeam(team.id.clone()));
            }
            for member in &team.agents {
                if !agent_ids.contains(member.as_str()) {
                    return Err(ConfigError::UnknownTeamMember {
                        team: team.id.clone(),
                        agent: member.clone(),
                    });
                }
            }
            if !team.agents.contains(&team.leader_agent) {
                return Err(ConfigError::LeaderNotInTeam {
                    team: team.id.clone(),
                    leader: team.leader_agent.clone(),
                });
            }
        }

        for swarm in &config.swarms {
            if !agent_ids.contains(swarm.agent.as_str()) {
                return Err(ConfigError::UnknownSwarmAgent {
                    swarm: swarm.id.clone(),
                    agent: swarm.agent.clone(),
                });
            }
            if let Some(reduce_agent) = swarm.reduce.as_ref().and_then(|r| r.agent.as_deref()) {
                if !agent_ids.contains(reduce_agent) {
                    return Err(ConfigError::UnknownReduceAgent {
                        swarm: swarm.id.clone(),
                        agent: reduce_agent.to_string(),
                    });
                }
            }
            if swarm.concurrency == 0 {
                return Err(ConfigError::InvalidConcurrency(swarm.id.clone()));
            }
            if swarm.batch_size == 0 {
                return Err(ConfigError::InvalidBatchSize(swarm.id.clone()));
            }
            if let Some(shuffle) = &swarm.shuffle {
                if shuffle.max_partition_size == 0 {
                    return Err(ConfigError::InvalidMaxPartitionSize(swarm.id.clone()));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AgentSpec, Provider, SwarmSpec, TeamSpec};

    fn agent(id: &str) -> AgentSpec {
        AgentSpec {
            id: id.into(),
            name: id.into(),
            provider: Provider::Anthropic,
            model: "opus".into(),
            working_directory: None,
        }
    }

    fn base_config() -> Config {
        Config {
            agents: vec![agent("alice"), agent("bob")],
            ..Config::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        let mut config = base_config();
        config.teams.push(TeamSpec {
            id: "eng".into(),
            name: "Engineering".into(),
            agents: vec!["alice".into(), "bob".into()],
            leader_agent: "alice".into(),
        });
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn rejects_uppercase_ids() {
        let mut config = base_config();
        config.agents.push(agent("alice")); // duplicate check later; test id first
        config.agents[0].id = "Alice".into();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidId(_))
        ));
    }

    #[test]
    fn rejects_reserved_ids() {
        let mut config = base_config();
        config.agents[0].id = "error".into();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ReservedId(_))
        ));
    }

    #[test]
    fn rejects_duplicate_ids_across_tables() {
        let mut config = base_config();
        config.teams.push(TeamSpec {
            id: "alice".into(),
            name: "Shadow".into(),
            agents: vec!["bob".into()],
            leader_agent: "bob".into(),
        });
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::DuplicateId(_))
        ));
    }

    #[test]
    fn rejects_leader_outside_team() {
        let mut config = base_config();
        config.teams.push(TeamSpec {
            id: "eng".into(),
            name: "Engineering".into(),
            agents: vec!["bob".into()],
            leader_agent: "alice".into(),
        });
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::LeaderNotInTeam { .. })
        ));
    }

    #[test]
    fn rejects_swarm_with_unknown_worker() {
        let mut config = base_config();
        config.swarms.push(
            serde_json::from_str::<SwarmSpec>(
                r#"{"id":"sum","name":"Sum","agent":"ghost","prompt_template":"go"}"#,
            )
            .unwrap(),
        );
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::UnknownSwarmAgent { .. })
        ));
    }

    #[test]
    fn loads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.yaml");
        std::fs::write(
            &path,
            concat!(
                "workspace_root: /tmp/ws\n",
                "agents:\n",
                "  - id: default\n",
                "    name: Default\n",
                "    provider: anthropic\n",
                "    model: opus\n",
            ),
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.agents.len(), 1);
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.workspace_root, std::path::PathBuf::from("/tmp/ws"));
    }
}
