//! Swarm engine - data-parallel map-reduce over many items.
//!
//! Pipeline for one swarm invocation: Input Resolution → Batch Split →
//! Worker Pool (Map) → optional Shuffle-by-Key → Partition Reduce → Final
//! Merge. A swarm runs to completion or fails; observers receive events but
//! no durable progress.

pub mod input;
pub mod pool;
pub mod reduce;
pub mod shuffle;

use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::domain::models::{
    AgentSpec, Batch, BatchStatus, Config, JobContext, JobStatus, Message, Roster, SwarmJob,
    SwarmSpec,
};
use crate::domain::ports::{Event, EventLevel, EventSink, Worker, WorkerError, WorkerRequest};
use crate::services::outbox::Outbox;

/// Terminal jobs stay queryable this long before eviction.
const JOB_RETENTION: Duration = Duration::from_secs(300);

/// Error types for a swarm run.
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("No input items could be resolved from the message")]
    NoInput,

    #[error("Resolved {count} items, exceeding the {cap}-item cap")]
    TooManyItems { count: usize, cap: usize },

    #[error("All {0} batches failed")]
    AllBatchesFailed(usize),

    #[error("Input command failed: {0}")]
    InputCommand(String),

    #[error("Swarm not found: {0}")]
    UnknownSwarm(String),

    #[error("Swarm worker agent not found: {0}")]
    UnknownAgent(String),
}

/// Shared references handed to the pipeline phases.
pub(crate) struct SwarmCtx<'a> {
    pub worker: &'a dyn Worker,
    pub events: &'a dyn EventSink,
    pub spec: &'a SwarmSpec,
    pub worker_agent: &'a AgentSpec,
    pub reducer_agent: &'a AgentSpec,
    pub workspace_root: &'a Path,
    pub user_message: &'a str,
}

impl SwarmCtx<'_> {
    /// Invoke an agent in a fresh conversation; batches and partitions have
    /// no shared memory.
    pub(crate) async fn invoke_fresh(
        &self,
        agent: &AgentSpec,
        prompt: String,
    ) -> Result<String, WorkerError> {
        let working_dir = agent.resolved_working_dir(self.workspace_root);
        let request = WorkerRequest::new(prompt, working_dir).fresh();
        Ok(self.worker.invoke(agent, request).await?.text)
    }
}

/// The swarm engine: owns the active-job map and drives the pipeline.
pub struct SwarmEngine {
    worker: Arc<dyn Worker>,
    events: Arc<dyn EventSink>,
    config: Arc<Config>,
    roster: Arc<Roster>,
    outbox: Arc<Outbox>,
    jobs: Arc<RwLock<HashMap<Uuid, SwarmJob>>>,
}

impl SwarmEngine {
    pub fn new(
        worker: Arc<dyn Worker>,
        events: Arc<dyn EventSink>,
        config: Arc<Config>,
        roster: Arc<Roster>,
        outbox: Arc<Outbox>,
    ) -> Self {
        Self {
            worker,
            events,
            config,
            roster,
            outbox,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Snapshot of one job, for status queries.
    pub async fn job(&self, id: Uuid) -> Option<SwarmJob> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// Run one swarm invocation to completion.
    ///
    /// Returns the final report text; the caller delivers it. Progress
    /// messages are delivered directly to the outgoing queue as the pool
    /// advances.
    pub async fn run(
        &self,
        swarm_id: &str,
        payload: &str,
        origin: &Message,
    ) -> Result<String, SwarmError> {
        let spec = self
            .roster
            .swarm(swarm_id)
            .cloned()
            .ok_or_else(|| SwarmError::UnknownSwarm(swarm_id.to_string()))?;
        let worker_agent = self
            .roster
            .agent(&spec.agent)
            .cloned()
            .ok_or_else(|| SwarmError::UnknownAgent(spec.agent.clone()))?;
        let reducer_agent = self
            .roster
            .agent(spec.reducer_agent())
            .cloned()
            .ok_or_else(|| SwarmError::UnknownAgent(spec.reducer_agent().to_string()))?;

        let job = SwarmJob::new(
            &spec.id,
            JobContext {
                channel: origin.channel.clone(),
                sender: origin.sender.clone(),
                message_id: origin.message_id.clone(),
            },
        );
        let job_id = job.id;
        self.jobs.write().await.insert(job_id, job);

        self.events
            .emit(Event::new("swarm", "swarm_job_start").with_payload(json!({
                "jobId": job_id,
                "swarm": spec.id,
                "messageId": origin.message_id,
            })))
            .await;

        let result = self.drive(job_id, &spec, &worker_agent, &reducer_agent, payload, origin).await;

        match &result {
            Ok(text) => {
                self.update_job(job_id, |job| job.complete(text.clone())).await;
                self.events
                    .emit(Event::new("swarm", "swarm_job_done").with_payload(json!({
                        "jobId": job_id,
                        "swarm": spec.id,
                    })))
                    .await;
            }
            Err(err) => {
                self.update_job(job_id, |job| job.fail(err.to_string())).await;
                self.events
                    .emit(
                        Event::new("swarm", "swarm_job_failed")
                            .with_level(EventLevel::Error)
                            .with_payload(json!({
                                "jobId": job_id,
                                "swarm": spec.id,
                                "error": err.to_string(),
                            })),
                    )
                    .await;
            }
        }

        self.schedule_eviction(job_id);
        result
    }

    /// The pipeline proper; job bookkeeping stays in `run`.
    async fn drive(
        &self,
        job_id: Uuid,
        spec: &SwarmSpec,
        worker_agent: &AgentSpec,
        reducer_agent: &AgentSpec,
        payload: &str,
        origin: &Message,
    ) -> Result<String, SwarmError> {
        let started = Instant::now();

        let ctx = SwarmCtx {
            worker: self.worker.as_ref(),
            events: self.events.as_ref(),
            spec,
            worker_agent,
            reducer_agent,
            workspace_root: &self.config.workspace_root,
            user_message: payload,
        };

        self.update_job(job_id, |job| job.status = JobStatus::FetchingInput)
            .await;
        let input_cwd = worker_agent.resolved_working_dir(&self.config.workspace_root);
        let items = input::resolve(
            spec,
            payload,
            origin,
            &input_cwd,
            self.config.limits.max_swarm_items,
            self.config.worker.max_output_bytes,
        )
        .await?;

        self.update_job(job_id, |job| {
            job.item_count = items.len();
            job.status = JobStatus::Splitting;
        })
        .await;

        let batches = split_batches(items, spec.batch_size);
        let total_batches = batches.len();
        self.events
            .emit(Event::new("swarm", "swarm_split_done").with_payload(json!({
                "jobId": job_id,
                "items": batches.iter().map(|b| b.items.len()).sum::<usize>(),
                "batches": total_batches,
            })))
            .await;

        self.update_job(job_id, |job| {
            job.status = JobStatus::Processing;
            job.progress.total_batches = total_batches;
        })
        .await;

        let batches = pool::run_map(&ctx, batches, &self.outbox, origin, started).await;

        let completed = batches
            .iter()
            .filter(|b| b.status == BatchStatus::Completed)
            .count();
        let failed = total_batches - completed;

        // Only successful batch results proceed downstream, in index order.
        let successes: Vec<String> = batches
            .iter()
            .filter(|b| b.status == BatchStatus::Completed)
            .filter_map(|b| b.result.clone())
            .collect();

        self.update_job(job_id, |job| {
            job.progress.completed_batches = completed;
            job.progress.failed_batches = failed;
            job.batches = batches;
        })
        .await;
        if successes.is_empty() {
            return Err(SwarmError::AllBatchesFailed(total_batches));
        }

        let body = if let Some(shuffle_spec) = &spec.shuffle {
            self.update_job(job_id, |job| job.status = JobStatus::Shuffling)
                .await;
            shuffle::run(&ctx, shuffle_spec, &successes).await
        } else {
            self.update_job(job_id, |job| job.status = JobStatus::Reducing)
                .await;
            reduce::run(&ctx, successes).await
        };

        let header = stats_header(
            &spec.name,
            self.job(job_id).await.map(|j| j.item_count).unwrap_or(0),
            completed,
            total_batches,
            spec.concurrency,
            started.elapsed(),
        );
        Ok(format!("{header}\n\n{body}"))
    }

    async fn update_job(&self, id: Uuid, mutate: impl FnOnce(&mut SwarmJob)) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&id) {
            mutate(job);
        }
    }

    fn schedule_eviction(&self, id: Uuid) {
        let jobs = Arc::clone(&self.jobs);
        tokio::spawn(async move {
            tokio::time::sleep(JOB_RETENTION).await;
            if jobs.write().await.remove(&id).is_some() {
                info!(job_id = %id, "evicted terminal swarm job");
            }
        });
    }
}

/// Partition items into contiguous batches of `batch_size`.
pub(crate) fn split_batches(items: Vec<String>, batch_size: usize) -> Vec<Batch> {
    items
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(index, chunk)| Batch::new(index, chunk.to_vec()))
        .collect()
}

/// Substitute `{{name}}` template variables.
pub(crate) fn render_template(template: &str, vars: &[(&str, String)]) -> String {
    let mut rendered = template.to_string();
    for (name, value) in vars {
        rendered = rendered.replace(&format!("{{{{{name}}}}}"), value);
    }
    rendered
}

/// Header prefixed to every swarm report.
pub(crate) fn stats_header(
    name: &str,
    items: usize,
    completed_batches: usize,
    total_batches: usize,
    workers: usize,
    elapsed: Duration,
) -> String {
    format!(
        "Swarm {name}: {items} items, {completed_batches}/{total_batches} batches succeeded, {workers} workers, {} elapsed.",
        format_elapsed(elapsed)
    )
}

/// `Hh Mm` over an hour, `Mm Ss` over a minute, else `Ss`.
pub(crate) fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_are_contiguous_and_indexed() {
        let items: Vec<String> = (1..=5).map(|i| i.to_string()).collect();
        let batches = split_batches(items, 2);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].items, vec!["1", "2"]);
        assert_eq!(batches[1].items, vec!["3", "4"]);
        assert_eq!(batches[2].items, vec!["5"]);
        assert_eq!(batches[2].index, 2);
        assert!(batches.iter().all(|b| b.status == BatchStatus::Pending));
    }

    #[test]
    fn template_rendering() {
        let rendered = render_template(
            "sum: {{items}} ({{batch_number}}/{{total_batches}})",
            &[
                ("items", "1\n2".to_string()),
                ("batch_number", "1".to_string()),
                ("total_batches", "3".to_string()),
            ],
        );
        assert_eq!(rendered, "sum: 1\n2 (1/3)");
    }

    #[test]
    fn elapsed_formats() {
        assert_eq!(format_elapsed(Duration::from_secs(12)), "12s");
        assert_eq!(format_elapsed(Duration::from_secs(222)), "3m 42s");
        assert_eq!(format_elapsed(Duration::from_secs(4980)), "1h 23m");
    }
}
