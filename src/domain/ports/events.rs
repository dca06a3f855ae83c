//! Event sink port for the observability stream.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl Default for EventLevel {
    fn default() -> Self {
        Self::Info
    }
}

/// A structured record written to the event stream.
///
/// Payloads are free-form JSON; consumers must tolerate extra fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Emitting component, e.g. `dispatcher` or `swarm`.
    pub component: String,

    #[serde(default)]
    pub level: EventLevel,

    /// Event type, e.g. `message_received` or `swarm_job_done`.
    #[serde(rename = "type")]
    pub kind: String,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub payload: Value,
}

impl Event {
    pub fn new(component: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            level: EventLevel::Info,
            kind: kind.into(),
            timestamp: Utc::now(),
            payload: Value::Null,
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: EventLevel) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Sink for the append-only event stream.
///
/// Emission is best-effort: implementations log and swallow write failures
/// rather than propagating them into the execution path.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: Event);
}

/// Sink that drops every event, for tests and headless runs.
#[derive(Debug, Default)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn emit(&self, _event: Event) {}
}
