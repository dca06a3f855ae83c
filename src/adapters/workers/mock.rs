//! Mock worker for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::models::AgentSpec;
use crate::domain::ports::{Worker, WorkerError, WorkerReply, WorkerRequest, WorkerResult};

/// Scripted behavior for one invocation.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return fixed text.
    Text(String),
    /// Return the received prompt verbatim.
    EchoPrompt,
    /// Return the part of the prompt after the first occurrence of the
    /// marker, or the whole prompt if absent.
    EchoAfter(String),
    /// Fail with a transient subprocess error.
    Fail(String),
}

impl ScriptedReply {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    fn apply(&self, prompt: &str) -> WorkerResult {
        match self {
            Self::Text(text) => Ok(WorkerReply::new(text.clone())),
            Self::EchoPrompt => Ok(WorkerReply::new(prompt)),
            Self::EchoAfter(marker) => {
                let text = prompt
                    .split_once(marker.as_str())
                    .map(|(_, rest)| rest)
                    .unwrap_or(prompt);
                Ok(WorkerReply::new(text))
            }
            Self::Fail(message) => Err(WorkerError::Failed {
                exit_code: 1,
                stderr: message.clone(),
            }),
        }
    }
}

/// A recorded invocation, for assertions.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub agent_id: String,
    pub prompt: String,
    pub working_dir: PathBuf,
    pub fresh_conversation: bool,
}

/// Mock worker with per-agent reply scripts.
///
/// Scripts are consumed front-to-back; when an agent's script runs dry the
/// default reply applies. Tracks every invocation and the concurrency
/// high-water mark.
pub struct MockWorker {
    default_reply: ScriptedReply,
    scripts: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    invocations: Mutex<Vec<Invocation>>,
    active: AtomicUsize,
    high_water: AtomicUsize,
    delay: Option<Duration>,
}

impl MockWorker {
    pub fn new() -> Self {
        Self {
            default_reply: ScriptedReply::EchoPrompt,
            scripts: Mutex::new(HashMap::new()),
            invocations: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
            delay: None,
        }
    }

    #[must_use]
    pub fn with_default_reply(mut self, reply: ScriptedReply) -> Self {
        self.default_reply = reply;
        self
    }

    /// Hold each invocation open briefly so concurrency overlaps.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue replies for an agent, consumed in order.
    pub fn script(&self, agent_id: &str, replies: Vec<ScriptedReply>) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .entry(agent_id.to_string())
            .or_default()
            .extend(replies);
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    /// Highest number of simultaneously outstanding invocations observed.
    pub fn max_concurrent(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}

impl Default for MockWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for MockWorker {
    async fn invoke(&self, agent: &AgentSpec, request: WorkerRequest) -> WorkerResult {
        {
            let mut invocations = self.invocations.lock().unwrap();
            invocations.push(Invocation {
                agent_id: agent.id.clone(),
                prompt: request.prompt.clone(),
                working_dir: request.working_dir.clone(),
                fresh_conversation: request.fresh_conversation,
            });
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(active, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = {
            let mut scripts = self.scripts.lock().unwrap();
            scripts
                .get_mut(&agent.id)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| self.default_reply.clone())
        };

        let result = reply.apply(&request.prompt);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Provider;

    fn agent(id: &str) -> AgentSpec {
        AgentSpec {
            id: id.into(),
            name: id.into(),
            provider: Provider::Anthropic,
            model: String::new(),
            working_directory: None,
        }
    }

    #[tokio::test]
    async fn scripts_are_consumed_in_order() {
        let worker = MockWorker::new();
        worker.script(
            "alice",
            vec![ScriptedReply::text("one"), ScriptedReply::text("two")],
        );

        let req = || WorkerRequest::new("hi", PathBuf::from("."));
        let a = agent("alice");

        assert_eq!(worker.invoke(&a, req()).await.unwrap().text, "one");
        assert_eq!(worker.invoke(&a, req()).await.unwrap().text, "two");
        // Script exhausted: default echo applies.
        assert_eq!(worker.invoke(&a, req()).await.unwrap().text, "hi");
        assert_eq!(worker.invocation_count(), 3);
    }

    #[tokio::test]
    async fn echo_after_strips_marker_prefix() {
        let reply = ScriptedReply::EchoAfter("sum: ".into());
        assert_eq!(reply.apply("sum: 1\n2").unwrap().text, "1\n2");
        assert_eq!(reply.apply("no marker").unwrap().text, "no marker");
    }

    #[tokio::test]
    async fn failure_is_transient() {
        let worker = MockWorker::new();
        worker.script("alice", vec![ScriptedReply::Fail("boom".into())]);
        let err = worker
            .invoke(&agent("alice"), WorkerRequest::new("hi", PathBuf::from(".")))
            .await
            .unwrap_err();
        assert!(!err.is_terminal());
    }
}
