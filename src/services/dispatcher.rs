//! Queue dispatcher - polls the incoming directory and fans files out onto
//! per-key FIFO lanes.
//!
//! Each target key (agent id, `swarm:<id>`, or the ambiguity sentinel) gets
//! its own lane: an unbounded channel drained by one task, so messages for
//! the same key run strictly in order while distinct keys run concurrently.
//! The dispatcher itself never awaits a message's completion.

use anyhow::{Context, Result};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::models::{Config, Message, Response, Roster};
use crate::domain::ports::{Event, EventLevel, EventSink, Worker};
use crate::services::outbox::{DeliveryStyle, Outbox};
use crate::services::routing::{self, RouteDecision};
use crate::services::swarm::SwarmEngine;
use crate::services::team_chain::ChainExecutor;

/// Rollback counters kept at most this many entries; oldest evicted first.
const ROLLBACK_LOG_CAP: usize = 1024;

/// One per-key FIFO lane.
struct Lane {
    tx: mpsc::UnboundedSender<String>,
    pending: Arc<AtomicUsize>,
}

/// Per-filename rollback counts with bounded memory.
struct RollbackLog {
    counts: HashMap<String, u32>,
    order: VecDeque<String>,
}

impl RollbackLog {
    fn new() -> Self {
        Self {
            counts: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Increment and return the count for a filename.
    fn record(&mut self, file_name: &str) -> u32 {
        if !self.counts.contains_key(file_name) {
            self.order.push_back(file_name.to_string());
            if self.order.len() > ROLLBACK_LOG_CAP {
                if let Some(evicted) = self.order.pop_front() {
                    self.counts.remove(&evicted);
                }
            }
        }
        let count = self.counts.entry(file_name.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    fn forget(&mut self, file_name: &str) {
        if self.counts.remove(file_name).is_some() {
            self.order.retain(|name| name != file_name);
        }
    }
}

/// Everything a lane task needs to process one message file.
struct DispatcherInner {
    config: Arc<Config>,
    roster: Arc<Roster>,
    events: Arc<dyn EventSink>,
    outbox: Arc<Outbox>,
    chains: ChainExecutor,
    swarm: SwarmEngine,
    tracked: Mutex<HashSet<String>>,
    rollbacks: Mutex<RollbackLog>,
}

/// The polling queue dispatcher.
pub struct QueueDispatcher {
    inner: Arc<DispatcherInner>,
    lanes: HashMap<String, Lane>,
}

impl QueueDispatcher {
    pub fn new(
        config: Arc<Config>,
        roster: Arc<Roster>,
        worker: Arc<dyn Worker>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let outbox = Arc::new(Outbox::new(&config));
        let chains = ChainExecutor::new(
            Arc::clone(&worker),
            Arc::clone(&events),
            Arc::clone(&config),
            Arc::clone(&roster),
        );
        let swarm = SwarmEngine::new(
            worker,
            Arc::clone(&events),
            Arc::clone(&config),
            Arc::clone(&roster),
            Arc::clone(&outbox),
        );

        Self {
            inner: Arc::new(DispatcherInner {
                config,
                roster,
                events,
                outbox,
                chains,
                swarm,
                tracked: Mutex::new(HashSet::new()),
                rollbacks: Mutex::new(RollbackLog::new()),
            }),
            lanes: HashMap::new(),
        }
    }

    /// Recover stranded files, then poll until the task is cancelled.
    pub async fn run(&mut self) -> Result<()> {
        self.recover().await?;

        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.inner.config.poll_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "poll tick failed");
            }
        }
    }

    /// Move every file stranded in `processing/` back to `incoming/`.
    ///
    /// Runs before the first tick; guarantees at-least-once delivery across
    /// crashes at the cost of possible re-execution.
    pub async fn recover(&self) -> Result<()> {
        for dir in self.inner.config.queue_dirs() {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create queue directory {}", dir.display()))?;
        }

        let processing = self.inner.config.processing_dir();
        let incoming = self.inner.config.incoming_dir();
        let mut recovered = 0usize;

        let mut entries = tokio::fs::read_dir(&processing).await?;
        while let Some(entry) = entries.next_entry().await? {
            let from = entry.path();
            let Some(name) = from.file_name() else { continue };
            let to = incoming.join(name);
            tokio::fs::rename(&from, &to)
                .await
                .with_context(|| format!("Failed to recover {}", from.display()))?;
            recovered += 1;
        }

        if recovered > 0 {
            info!(recovered, "restored stranded processing files to incoming");
            self.inner
                .events
                .emit(
                    Event::new("dispatcher", "recovery_done")
                        .with_payload(json!({"recovered": recovered})),
                )
                .await;
        }
        Ok(())
    }

    /// One poll tick: reap drained lanes, then enqueue untracked files.
    pub async fn poll_once(&mut self) -> Result<()> {
        // A drained lane's sender drops here; its task exits on the closed
        // channel and the next message for that key gets a fresh lane.
        self.lanes
            .retain(|_, lane| lane.pending.load(Ordering::SeqCst) > 0);

        for file_name in list_by_mtime(&self.inner.config.incoming_dir()).await? {
            {
                let mut tracked = self.inner.tracked.lock().unwrap();
                if !tracked.insert(file_name.clone()) {
                    continue;
                }
            }

            let key = match self.inner.peek_target(&file_name).await {
                Ok(key) => key,
                Err(e) => {
                    debug!(file = %file_name, error = %e, "peek failed; leaving for retry");
                    self.inner.handle_peek_failure(&file_name).await;
                    self.inner.tracked.lock().unwrap().remove(&file_name);
                    continue;
                }
            };

            let lane = self
                .lanes
                .entry(key.clone())
                .or_insert_with(|| spawn_lane(Arc::clone(&self.inner), key.clone()));
            lane.pending.fetch_add(1, Ordering::SeqCst);
            if lane.tx.send(file_name.clone()).is_err() {
                // Lane task died; untrack so the next tick retries.
                lane.pending.fetch_sub(1, Ordering::SeqCst);
                self.inner.tracked.lock().unwrap().remove(&file_name);
            }
        }
        Ok(())
    }
}

/// Spawn the drainer task for a new lane.
fn spawn_lane(inner: Arc<DispatcherInner>, key: String) -> Lane {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let pending = Arc::new(AtomicUsize::new(0));
    let lane_pending = Arc::clone(&pending);

    tokio::spawn(async move {
        while let Some(file_name) = rx.recv().await {
            inner.process_file(&key, &file_name).await;
            lane_pending.fetch_sub(1, Ordering::SeqCst);
            inner.tracked.lock().unwrap().remove(&file_name);
        }
        debug!(key, "lane drained");
    });

    Lane { tx, pending }
}

impl DispatcherInner {
    /// Read just enough of a file to pick its serialization key.
    async fn peek_target(&self, file_name: &str) -> Result<String> {
        let path = self.config.incoming_dir().join(file_name);
        let raw = tokio::fs::read_to_string(&path).await?;
        let message: Message = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed message file {file_name}"))?;
        Ok(routing::target_key(&message, &self.roster))
    }

    /// A file that cannot even be peeked stays in `incoming/`; after enough
    /// failed attempts it moves to the dead-letter directory.
    async fn handle_peek_failure(&self, file_name: &str) {
        let count = self.rollbacks.lock().unwrap().record(file_name);
        if count >= self.config.limits.dead_letter_after {
            let from = self.config.incoming_dir().join(file_name);
            self.dead_letter(&from, file_name).await;
        }
    }

    /// Process one message file end to end.
    ///
    /// Worker failures never reach this level; they become response text at
    /// the call site. An error here is a framework error and rolls the file
    /// back to `incoming/` for a later tick.
    async fn process_file(&self, key: &str, file_name: &str) {
        let incoming = self.config.incoming_dir().join(file_name);
        let processing = self.config.processing_dir().join(file_name);

        if let Err(e) = tokio::fs::rename(&incoming, &processing).await {
            warn!(file = %file_name, error = %e, "file vanished before processing");
            return;
        }

        match self.execute_file(key, &processing).await {
            Ok(()) => {
                if let Err(e) = tokio::fs::remove_file(&processing).await {
                    warn!(file = %file_name, error = %e, "failed to delete processed file");
                }
                self.rollbacks.lock().unwrap().forget(file_name);
            }
            Err(e) => {
                warn!(file = %file_name, error = %e, "processing failed; rolling back");
                self.events
                    .emit(
                        Event::new("dispatcher", "message_rollback")
                            .with_level(EventLevel::Warning)
                            .with_payload(json!({"file": file_name, "error": e.to_string()})),
                    )
                    .await;

                let count = self.rollbacks.lock().unwrap().record(file_name);
                if count >= self.config.limits.dead_letter_after {
                    self.dead_letter(&processing, file_name).await;
                } else if let Err(e) = tokio::fs::rename(&processing, &incoming).await {
                    warn!(file = %file_name, error = %e, "rollback rename failed");
                }
            }
        }
    }

    async fn execute_file(&self, key: &str, path: &Path) -> Result<()> {
        let raw = tokio::fs::read_to_string(path).await?;
        let message: Message =
            serde_json::from_str(&raw).context("Malformed message JSON in processing file")?;

        self.events
            .emit(Event::new("dispatcher", "message_received").with_payload(json!({
                "messageId": message.message_id,
                "channel": message.channel,
                "key": key,
            })))
            .await;

        match routing::resolve(&message, &self.roster) {
            RouteDecision::Ambiguous => {
                let response = Response::answering(&message, routing::AMBIGUOUS_RESPONSE);
                self.outbox.deliver(response, DeliveryStyle::Standard).await?;
            }
            RouteDecision::Agent { agent_id, payload } => {
                self.emit_routed(&message, &agent_id, "agent").await;
                let outcome = self.chains.execute(&agent_id, &payload, None, &message).await;
                let response = Response::answering(&message, outcome.text)
                    .with_agent(&agent_id)
                    .with_files(paths_to_strings(outcome.attachments));
                self.outbox.deliver(response, DeliveryStyle::Standard).await?;
            }
            RouteDecision::Team {
                team_id,
                leader,
                payload,
            } => {
                self.emit_routed(&message, &leader, "team").await;
                let team = self
                    .roster
                    .team(&team_id)
                    .cloned()
                    .context("Routed team disappeared from roster")?;
                let outcome = self
                    .chains
                    .execute(&leader, &payload, Some(&team), &message)
                    .await;
                let response = Response::answering(&message, outcome.text)
                    .with_agent(&leader)
                    .with_files(paths_to_strings(outcome.attachments));
                self.outbox.deliver(response, DeliveryStyle::Standard).await?;
            }
            RouteDecision::Swarm { swarm_id, payload } => {
                self.emit_routed(&message, &swarm_id, "swarm").await;
                match self.swarm.run(&swarm_id, &payload, &message).await {
                    Ok(report) => {
                        let response = Response::answering(&message, report);
                        let file_stem = format!("swarm_{}_{}", swarm_id, message.message_id);
                        self.outbox
                            .deliver(response, DeliveryStyle::SwarmReport { file_stem })
                            .await?;
                    }
                    Err(err) => {
                        let response = Response::answering(
                            &message,
                            format!("Swarm {swarm_id} failed: {err}"),
                        );
                        self.outbox.deliver(response, DeliveryStyle::Standard).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn emit_routed(&self, message: &Message, target: &str, mode: &str) {
        self.events
            .emit(Event::new("dispatcher", "agent_routed").with_payload(json!({
                "messageId": message.message_id,
                "target": target,
                "mode": mode,
            })))
            .await;
        self.events
            .emit(Event::new("dispatcher", "processor_start").with_payload(json!({
                "messageId": message.message_id,
                "mode": mode,
            })))
            .await;
    }

    async fn dead_letter(&self, from: &Path, file_name: &str) {
        let to = self.config.dead_letter_dir().join(file_name);
        match tokio::fs::rename(from, &to).await {
            Ok(()) => {
                warn!(file = %file_name, "moved repeatedly failing message to dead-letter");
                self.rollbacks.lock().unwrap().forget(file_name);
                self.events
                    .emit(
                        Event::new("dispatcher", "message_dead_lettered")
                            .with_level(EventLevel::Error)
                            .with_payload(json!({"file": file_name})),
                    )
                    .await;
            }
            Err(e) => warn!(file = %file_name, error = %e, "dead-letter move failed"),
        }
    }
}

fn paths_to_strings(paths: Vec<PathBuf>) -> Vec<String> {
    paths.into_iter().map(|p| p.display().to_string()).collect()
}

/// `*.json` files in a directory, sorted by modification time ascending
/// (name as tie-break).
async fn list_by_mtime(dir: &Path) -> Result<Vec<String>> {
    let mut files: Vec<(std::time::SystemTime, String)> = Vec::new();

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let mtime = entry
            .metadata()
            .await
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        files.push((mtime, name.to_string()));
    }

    files.sort();
    Ok(files.into_iter().map(|(_, name)| name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_log_counts_and_forgets() {
        let mut log = RollbackLog::new();
        assert_eq!(log.record("a.json"), 1);
        assert_eq!(log.record("a.json"), 2);
        log.forget("a.json");
        assert_eq!(log.record("a.json"), 1);
    }

    #[test]
    fn rollback_log_evicts_oldest_past_cap() {
        let mut log = RollbackLog::new();
        for i in 0..=ROLLBACK_LOG_CAP {
            log.record(&format!("{i}.json"));
        }
        assert!(log.counts.len() <= ROLLBACK_LOG_CAP);
        assert!(!log.counts.contains_key("0.json"));
        assert!(log.counts.contains_key(&format!("{ROLLBACK_LOG_CAP}.json")));
    }
}
