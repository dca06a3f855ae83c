//! Common test utilities for integration tests.
//!
//! Provides a temp-workspace test bed with a scripted mock worker, an
//! event-collecting sink, and queue helpers shared across test files.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use switchboard::adapters::MockWorker;
use switchboard::domain::models::{AgentSpec, Config, Message, Provider, Response, Roster};
use switchboard::domain::ports::{Event, EventSink};
use switchboard::services::QueueDispatcher;

/// Event sink that records everything for assertions.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn of_kind(&self, kind: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn emit(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// A disposable workspace with a running-ready dispatcher.
pub struct TestBed {
    pub dir: TempDir,
    pub config: Arc<Config>,
    pub roster: Arc<Roster>,
    pub worker: Arc<MockWorker>,
    pub events: Arc<CollectingSink>,
}

impl TestBed {
    /// Build a test bed; the mutator fills in agents/teams/swarms.
    pub fn new(mutate: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut config = Config {
            workspace_root: dir.path().to_path_buf(),
            poll_interval_ms: 50,
            ..Config::default()
        };
        mutate(&mut config);

        let config = Arc::new(config);
        let roster = Arc::new(Roster::from_config(&config).expect("valid test roster"));

        Self {
            dir,
            config,
            roster,
            worker: Arc::new(MockWorker::new()),
            events: Arc::new(CollectingSink::default()),
        }
    }

    /// Replace the default mock worker before starting the dispatcher.
    pub fn with_worker(mut self, worker: MockWorker) -> Self {
        self.worker = Arc::new(worker);
        self
    }

    pub fn dispatcher(&self) -> QueueDispatcher {
        QueueDispatcher::new(
            Arc::clone(&self.config),
            Arc::clone(&self.roster),
            self.worker.clone(),
            self.events.clone(),
        )
    }

    /// Spawn the dispatcher loop in the background.
    pub fn start(&self) {
        let mut dispatcher = self.dispatcher();
        tokio::spawn(async move {
            let _ = dispatcher.run().await;
        });
    }

    /// Drop a message file into the incoming queue.
    pub fn write_incoming(&self, message: &Message) {
        let dir = self.config.incoming_dir();
        std::fs::create_dir_all(&dir).expect("create incoming");
        let name = format!(
            "{}_{}_{}.json",
            message.channel, message.message_id, message.timestamp
        );
        std::fs::write(dir.join(name), serde_json::to_vec(message).unwrap())
            .expect("write incoming message");
    }

    /// Parsed responses currently in the outgoing queue.
    pub fn outgoing(&self) -> Vec<Response> {
        let dir = self.config.outgoing_dir();
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();
        paths
            .iter()
            .filter_map(|p| std::fs::read_to_string(p).ok())
            .filter_map(|raw| serde_json::from_str(&raw).ok())
            .collect()
    }

    pub fn incoming_files(&self) -> Vec<String> {
        list_names(&self.config.incoming_dir())
    }

    pub fn processing_files(&self) -> Vec<String> {
        list_names(&self.config.processing_dir())
    }

    #[allow(dead_code)]
    pub fn dead_letter_files(&self) -> Vec<String> {
        list_names(&self.config.dead_letter_dir())
    }

    /// Wait until at least `count` responses are in the outgoing queue.
    pub async fn wait_for_outgoing(&self, count: usize) -> Vec<Response> {
        assert!(
            wait_for(|| self.outgoing().len() >= count, 10_000).await,
            "timed out waiting for {count} outgoing responses (have {})",
            self.outgoing().len()
        );
        self.outgoing()
    }
}

fn list_names(dir: &std::path::Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}

/// Agent spec fixture with no working directory override.
pub fn agent(id: &str) -> AgentSpec {
    AgentSpec {
        id: id.into(),
        name: id.into(),
        provider: Provider::Anthropic,
        model: String::new(),
        working_directory: None,
    }
}

/// Poll a predicate every 25ms until it holds or the timeout elapses.
pub async fn wait_for<F>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    predicate()
}
