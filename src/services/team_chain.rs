//! Team chain execution.
//!
//! Runs the addressed agent, scans its output for teammate mentions, and
//! continues with sequential handoff or parallel fan-out until no teammate
//! is mentioned. Also serves single-agent messages as a one-step chain with
//! no team in scope.

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::models::{Config, Message, Roster, TeamSpec};
use crate::domain::ports::{Event, EventLevel, EventSink, Worker, WorkerRequest};
use crate::services::{memory_composer, outbox, routing};

/// A warning event is emitted when a chain passes this many steps.
const CHAIN_WARN_DEPTH: usize = 10;

/// Hard ceiling; the chain terminates with a user-visible error past it.
const CHAIN_MAX_DEPTH: usize = 50;

/// Shown when a worker invocation fails transiently.
const APOLOGY: &str =
    "Sorry, I ran into a problem handling that and couldn't finish. Please try again.";

/// One step of a chain, kept for aggregation and the transcript.
#[derive(Debug, Clone)]
pub struct ChainStep {
    pub agent_id: String,
    pub response: String,
}

/// Final result of a chain run.
#[derive(Debug)]
pub struct ChainOutcome {
    pub text: String,
    pub attachments: Vec<PathBuf>,
    pub steps: Vec<ChainStep>,
}

/// Executes conversational work: single agents and team chains.
pub struct ChainExecutor {
    worker: Arc<dyn Worker>,
    events: Arc<dyn EventSink>,
    config: Arc<Config>,
    roster: Arc<Roster>,
}

impl ChainExecutor {
    pub fn new(
        worker: Arc<dyn Worker>,
        events: Arc<dyn EventSink>,
        config: Arc<Config>,
        roster: Arc<Roster>,
    ) -> Self {
        Self {
            worker,
            events,
            config,
            roster,
        }
    }

    /// Run a chain starting at `start_agent`.
    ///
    /// With no team in scope this is a single invocation: no mention scan,
    /// no transcript.
    pub async fn execute(
        &self,
        start_agent: &str,
        message: &str,
        team: Option<&TeamSpec>,
        origin: &Message,
    ) -> ChainOutcome {
        let mut steps: Vec<ChainStep> = Vec::new();
        let mut attachments: Vec<PathBuf> = Vec::new();
        let mut current_agent = start_agent.to_string();
        let mut current_message = message.to_string();

        if let Some(team) = team {
            self.events
                .emit(Event::new("team_chain", "team_chain_start").with_payload(json!({
                    "team": team.id,
                    "leader": start_agent,
                    "messageId": origin.message_id,
                })))
                .await;
        }

        loop {
            let depth = steps.len();
            if depth >= CHAIN_MAX_DEPTH {
                warn!(team = ?team.map(|t| &t.id), depth, "chain hit hard depth ceiling");
                steps.push(ChainStep {
                    agent_id: current_agent.clone(),
                    response: format!(
                        "[Chain stopped: {CHAIN_MAX_DEPTH} handoffs reached without resolution]"
                    ),
                });
                break;
            }
            if depth == CHAIN_WARN_DEPTH {
                self.events
                    .emit(
                        Event::new("team_chain", "team_chain_deep")
                            .with_level(EventLevel::Warning)
                            .with_payload(json!({"depth": depth, "agent": current_agent})),
                    )
                    .await;
            }

            // Step 0 honors the global flag; later steps each agent's own.
            let fresh = if depth == 0 {
                self.consume_global_reset().await || self.consume_agent_reset(&current_agent).await
            } else {
                self.consume_agent_reset(&current_agent).await
            };

            self.events
                .emit(
                    Event::new("team_chain", "team_chain_step_start")
                        .with_payload(json!({"agent": current_agent, "step": depth})),
                )
                .await;

            let raw = self.invoke_agent(&current_agent, &current_message, fresh).await;
            let (clean, files) = outbox::extract_send_files(&raw);
            attachments.extend(files);
            steps.push(ChainStep {
                agent_id: current_agent.clone(),
                response: clean.clone(),
            });

            self.events
                .emit(
                    Event::new("team_chain", "team_chain_step_done")
                        .with_payload(json!({"agent": current_agent, "step": depth})),
                )
                .await;

            let Some(team) = team else { break };

            let teammates = team.teammates_of(&current_agent);
            let mentions = routing::extract_mentions(&clean, &teammates);

            match mentions.as_slice() {
                [] => break,
                [mention] => {
                    self.events
                        .emit(
                            Event::new("team_chain", "team_chain_handoff").with_payload(
                                json!({"from": current_agent, "to": mention.agent_id}),
                            ),
                        )
                        .await;
                    current_message = teammate_message(&current_agent, &mention.body);
                    current_agent = mention.agent_id.clone();
                }
                many => {
                    // Fan-out: all teammates concurrently, each in a fresh
                    // conversation, appended in input order; the chain ends
                    // after a fan-out.
                    let from = current_agent.clone();
                    let invocations = many.iter().map(|mention| {
                        let message = teammate_message(&from, &mention.body);
                        let agent_id = mention.agent_id.clone();
                        async move {
                            let raw = self.invoke_agent(&agent_id, &message, true).await;
                            (agent_id, raw)
                        }
                    });
                    for (agent_id, raw) in join_all(invocations).await {
                        let (clean, files) = outbox::extract_send_files(&raw);
                        attachments.extend(files);
                        steps.push(ChainStep {
                            agent_id,
                            response: clean,
                        });
                    }
                    break;
                }
            }
        }

        if let Some(team) = team {
            self.events
                .emit(Event::new("team_chain", "team_chain_end").with_payload(json!({
                    "team": team.id,
                    "steps": steps.len(),
                })))
                .await;
            self.persist_transcript(team, origin, &steps).await;
        }

        attachments.dedup();
        ChainOutcome {
            text: aggregate(&steps),
            attachments,
            steps,
        }
    }

    /// Invoke one agent and always come back with displayable text.
    ///
    /// Worker failures are converted at this call site; the chain continues
    /// with the text as the step response.
    async fn invoke_agent(&self, agent_id: &str, message: &str, fresh: bool) -> String {
        let agent = match self.roster.agent(agent_id) {
            Some(agent) => agent,
            None => return format!("[Agent @{agent_id} is not configured]"),
        };

        let working_dir = agent.resolved_working_dir(&self.config.workspace_root);
        let prompt = memory_composer::compose_prompt(&working_dir, message);

        let mut request = WorkerRequest::new(prompt, working_dir);
        request.fresh_conversation = fresh;

        match self.worker.invoke(agent, request).await {
            Ok(reply) => reply.text,
            Err(err) if err.is_terminal() => {
                warn!(agent = agent_id, error = %err, "terminal worker failure");
                format!("[Agent @{agent_id} is unavailable: {err}]")
            }
            Err(err) => {
                warn!(agent = agent_id, error = %err, "transient worker failure");
                APOLOGY.to_string()
            }
        }
    }

    async fn consume_global_reset(&self) -> bool {
        self.consume_flag(self.config.flags_dir().join("reset")).await
    }

    async fn consume_agent_reset(&self, agent_id: &str) -> bool {
        self.consume_flag(self.config.flags_dir().join(format!("reset-{agent_id}")))
            .await
    }

    /// The flag is consumed (deleted) when observed.
    async fn consume_flag(&self, path: PathBuf) -> bool {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(flag = %path.display(), "consumed reset flag");
                true
            }
            Err(_) => false,
        }
    }

    /// Write the chain transcript; failures are logged and swallowed.
    async fn persist_transcript(&self, team: &TeamSpec, origin: &Message, steps: &[ChainStep]) {
        let now = Utc::now();
        let dir = self.config.chats_dir().join(&team.id);
        let path = dir.join(format!("{}.md", now.format("%Y-%m-%dT%H-%M-%S%.3fZ")));

        let mut body = format!(
            "# Team {} chain\n\n- Time: {}\n- Channel: {}\n- Sender: {}\n- Steps: {}\n\n## User message\n\n{}\n",
            team.name,
            now.to_rfc3339(),
            origin.channel,
            origin.sender,
            steps.len(),
            origin.message,
        );
        for (i, step) in steps.iter().enumerate() {
            body.push_str(&format!(
                "\n## Step {}: @{}\n\n{}\n",
                i + 1,
                step.agent_id,
                step.response
            ));
        }

        let result = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, body).await
        }
        .await;

        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to write team transcript");
        }
    }
}

fn teammate_message(from: &str, body: &str) -> String {
    format!("[Message from teammate @{from}]:\n{body}")
}

/// Aggregate chain steps into the final response text.
fn aggregate(steps: &[ChainStep]) -> String {
    match steps {
        [only] => only.response.clone(),
        many => many
            .iter()
            .map(|step| format!("@{}: {}", step.agent_id, step.response))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_step_aggregates_verbatim() {
        let steps = vec![ChainStep {
            agent_id: "alice".into(),
            response: "done".into(),
        }];
        assert_eq!(aggregate(&steps), "done");
    }

    #[test]
    fn multi_step_aggregation_prefixes_and_separates() {
        let steps = vec![
            ChainStep {
                agent_id: "alice".into(),
                response: "@bob please continue".into(),
            },
            ChainStep {
                agent_id: "bob".into(),
                response: "done".into(),
            },
        ];
        assert_eq!(
            aggregate(&steps),
            "@alice: @bob please continue\n\n---\n\n@bob: done"
        );
    }

    #[test]
    fn teammate_message_format() {
        assert_eq!(
            teammate_message("alice", "take over"),
            "[Message from teammate @alice]:\ntake over"
        );
    }
}
