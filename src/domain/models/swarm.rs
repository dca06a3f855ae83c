//! Swarm configuration and in-memory job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How raw command/file output turns into items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    /// Split on newlines, drop empty lines.
    Lines,
    /// Parse as a JSON array, stringify each element.
    JsonArray,
}

impl Default for InputFormat {
    fn default() -> Self {
        Self::Lines
    }
}

/// Configured input source for a swarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    /// Shell command, with `{{param}}` substitution from the user message.
    pub command: String,

    #[serde(default, rename = "type")]
    pub format: InputFormat,
}

/// How an item carrying multiple key values is grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiKey {
    /// Include the item under every produced key.
    Duplicate,
    /// Include only under the first key.
    First,
}

impl Default for MultiKey {
    fn default() -> Self {
        Self::Duplicate
    }
}

/// Optional shuffle-by-key stage between map and reduce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShuffleSpec {
    /// Field read from each parsed map-output item.
    pub key_field: String,

    #[serde(default)]
    pub multi_key: MultiKey,

    #[serde(default = "default_max_partition_size")]
    pub max_partition_size: usize,

    /// Per-partition reducer prompt; a duplicate-detection default applies
    /// when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce_prompt: Option<String>,

    /// Final merge prompt over all partition results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_prompt: Option<String>,
}

const fn default_max_partition_size() -> usize {
    200
}

/// Reduce strategy when no shuffle is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceStrategy {
    Concatenate,
    Summarize,
    Hierarchical,
}

impl Default for ReduceStrategy {
    fn default() -> Self {
        Self::Concatenate
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceSpec {
    #[serde(default)]
    pub strategy: ReduceStrategy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Overrides the swarm's worker agent for reduction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

/// A declarative map-reduce pipeline run for one user message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmSpec {
    pub id: String,

    pub name: String,

    /// Worker agent id used for map invocations.
    pub agent: String,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputSpec>,

    /// Template rendered once per batch; see the worker-pool phase for the
    /// available `{{variables}}`.
    pub prompt_template: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffle: Option<ShuffleSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce: Option<ReduceSpec>,

    /// Emit a progress message every N completed batches; 0 disables.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,
}

const fn default_concurrency() -> usize {
    5
}

const fn default_batch_size() -> usize {
    25
}

const fn default_progress_interval() -> usize {
    10
}

impl SwarmSpec {
    pub fn reduce_strategy(&self) -> ReduceStrategy {
        self.reduce
            .as_ref()
            .map(|r| r.strategy)
            .unwrap_or_default()
    }

    /// Agent id used for reduce/merge invocations.
    pub fn reducer_agent(&self) -> &str {
        self.reduce
            .as_ref()
            .and_then(|r| r.agent.as_deref())
            .unwrap_or(&self.agent)
    }
}

/// Lifecycle of one swarm job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Initializing,
    FetchingInput,
    Splitting,
    Processing,
    Shuffling,
    Reducing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One contiguous slice of input items, processed by one worker invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// 0-based position in the split.
    pub index: usize,

    pub items: Vec<String>,

    pub status: BatchStatus,

    /// Map output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    /// Last error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Batch {
    pub fn new(index: usize, items: Vec<String>) -> Self {
        Self {
            index,
            items,
            status: BatchStatus::Pending,
            result: None,
            error: None,
        }
    }
}

/// Progress counters kept on the job while the pool runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobProgress {
    pub total_batches: usize,
    pub completed_batches: usize,
    pub failed_batches: usize,
}

/// Origin of a swarm job, threaded through for response routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobContext {
    pub channel: String,
    pub sender: String,
    pub message_id: String,
}

/// In-memory record of one swarm run, retained briefly after completion
/// for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmJob {
    pub id: Uuid,

    pub swarm_id: String,

    pub status: JobStatus,

    pub progress: JobProgress,

    pub item_count: usize,

    /// Batch records with their items and terminal results, filled in once
    /// the map phase settles.
    #[serde(default)]
    pub batches: Vec<Batch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub context: JobContext,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl SwarmJob {
    pub fn new(swarm_id: impl Into<String>, context: JobContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            swarm_id: swarm_id.into(),
            status: JobStatus::Initializing,
            progress: JobProgress::default(),
            item_count: 0,
            batches: Vec::new(),
            result: None,
            error: None,
            context,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn complete(&mut self, result: impl Into<String>) {
        self.status = JobStatus::Completed;
        self.result = Some(result.into());
        self.finished_at = Some(Utc::now());
    }
}
