//! Domain errors for the Switchboard orchestrator.

use thiserror::Error;

/// Domain-level errors that can occur while resolving and executing work.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Team not found: {0}")]
    TeamNotFound(String),

    #[error("Swarm not found: {0}")]
    SwarmNotFound(String),

    #[error("No agents configured")]
    NoAgentsConfigured,

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Queue I/O error: {0}")]
    QueueIo(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::QueueIo(err.to_string())
    }
}
