//! Memory artifact records.
//!
//! Per-agent memory lives as files under the agent's working directory:
//! `memory/knowledge.md`, `memory/reflections.jsonl`, `memory/episodes.jsonl`,
//! and `memory/skills/`. Records are parsed leniently: every field except
//! `ts` is optional in practice, and malformed lines are skipped rather than
//! surfaced.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classification tag on a reflection line.
///
/// Unknown tags are preserved and displayed verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReflectionKind {
    Failure,
    Success,
    Insight,
    Other(String),
}

impl ReflectionKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Failure => "failure",
            Self::Success => "success",
            Self::Insight => "insight",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for ReflectionKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "failure" => Self::Failure,
            "success" => Self::Success,
            "insight" => Self::Insight,
            _ => Self::Other(tag),
        }
    }
}

impl<'de> Deserialize<'de> for ReflectionKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(String::deserialize(deserializer)?.into())
    }
}

impl Serialize for ReflectionKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl Default for ReflectionKind {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

/// One line of `memory/reflections.jsonl`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reflection {
    #[serde(default)]
    pub ts: String,

    #[serde(default, rename = "type")]
    pub kind: ReflectionKind,

    #[serde(default)]
    pub context: String,

    #[serde(default)]
    pub lesson: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl Reflection {
    /// Render as a memory-block bullet.
    pub fn render(&self) -> String {
        let mut line = format!("- [{}] {}: {}", self.kind.as_str(), self.context, self.lesson);
        if let Some(action) = &self.action {
            line.push_str(" → ");
            line.push_str(action);
        }
        line
    }
}

/// One line of `memory/episodes.jsonl`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Episode {
    #[serde(default)]
    pub ts: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub outcome: String,
}

impl Episode {
    /// Text the relevance scorer matches user-message words against.
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.summary, self.tags.join(" ")).to_lowercase()
    }

    pub fn render(&self) -> String {
        format!(
            "- [{}] {} ({})",
            self.outcome,
            self.summary,
            self.tags.join(", ")
        )
    }
}

/// `memory/skills/index.json`: skill id → description.
///
/// A BTreeMap keeps composition deterministic across invocations.
pub type SkillIndex = BTreeMap<String, String>;
