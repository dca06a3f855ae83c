//! Routing resolution for inbound messages.
//!
//! Parses the leading `@name` run at the start of a message and matches it
//! against the configured agent, team, and swarm tables. Also extracts
//! teammate mentions from agent output for the chain executor.

use regex::Regex;
use std::sync::OnceLock;

use crate::domain::models::{Message, Roster};

/// Serialization key for ambiguous multi-mention messages. Never a valid
/// configured id (reserved at config load).
pub const AMBIGUOUS_KEY: &str = "error";

/// Fixed response for messages that mention several agents at once.
pub const AMBIGUOUS_RESPONSE: &str =
    "One at a time, please! Mentioning several agents in the same breath summons nobody.";

fn mention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"@([a-z][a-z0-9_-]*)").expect("mention pattern"))
}

/// Where a message should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Single conversational agent.
    Agent { agent_id: String, payload: String },
    /// Team chain entered at the leader.
    Team {
        team_id: String,
        leader: String,
        payload: String,
    },
    /// Swarm pipeline, serialized off the worker agent's lane.
    Swarm { swarm_id: String, payload: String },
    /// More than one agent/team mentioned up front.
    Ambiguous,
}

/// The leading run of `@token`s and the payload that follows it.
///
/// Tokens are consumed while they match `@[a-z][a-z0-9_-]*`; the payload is
/// the remainder after the run.
fn leading_tokens(message: &str) -> (Vec<&str>, &str) {
    let mut tokens = Vec::new();
    let mut rest = message.trim_start();

    loop {
        let Some(candidate) = rest.split_whitespace().next() else {
            break;
        };
        let Some(id) = candidate.strip_prefix('@') else {
            break;
        };
        if !id_like(id) {
            break;
        }
        tokens.push(id);
        rest = rest[candidate.len()..].trim_start();
    }

    (tokens, rest)
}

fn id_like(id: &str) -> bool {
    let mut chars = id.chars();
    matches!(chars.next(), Some('a'..='z'))
        && chars.all(|c| matches!(c, 'a'..='z' | '0'..='9' | '_' | '-'))
}

/// Resolve a message against the roster.
///
/// A pre-routed `agent` field wins when it names a known agent. Otherwise
/// the leading mention run decides: zero matched ids fall through to the
/// default agent, one id routes to that agent / team leader / swarm, and
/// more than one matched id is ambiguous.
pub fn resolve(message: &Message, roster: &Roster) -> RouteDecision {
    if let Some(hint) = &message.agent {
        if roster.agent(hint).is_some() {
            return RouteDecision::Agent {
                agent_id: hint.clone(),
                payload: message.message.clone(),
            };
        }
    }

    let (tokens, payload) = leading_tokens(&message.message);

    // Swarm handshake: `@swarm <id>` or a direct `@<swarmId>`.
    if let Some(&first) = tokens.first() {
        if first == "swarm" {
            // The swarm id follows as a second token, mentioned or plain.
            let (candidate, rest) = match tokens.get(1) {
                Some(&id) => (Some(id), payload),
                None => {
                    let mut words = payload.splitn(2, char::is_whitespace);
                    (words.next(), words.next().unwrap_or("").trim_start())
                }
            };
            if let Some(swarm) = candidate.and_then(|id| roster.swarm(id)) {
                return RouteDecision::Swarm {
                    swarm_id: swarm.id.clone(),
                    payload: rest.to_string(),
                };
            }
        } else if let Some(swarm) = roster.swarm(first) {
            return RouteDecision::Swarm {
                swarm_id: swarm.id.clone(),
                payload: payload.to_string(),
            };
        }
    }

    let matched: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|id| roster.agent(id).is_some() || roster.team(id).is_some())
        .collect();

    match matched.as_slice() {
        [] => RouteDecision::Agent {
            agent_id: roster.default_agent_id().to_string(),
            payload: message.message.clone(),
        },
        [id] => {
            if let Some(team) = roster.team(id) {
                RouteDecision::Team {
                    team_id: team.id.clone(),
                    leader: team.leader_agent.clone(),
                    payload: payload.to_string(),
                }
            } else {
                RouteDecision::Agent {
                    agent_id: (*id).to_string(),
                    payload: payload.to_string(),
                }
            }
        }
        _ => RouteDecision::Ambiguous,
    }
}

/// The per-key serialization key for a message (the dispatcher's "peek").
///
/// Swarm work keys as `swarm:<id>` so it never blocks the worker agent's
/// conversational lane; ambiguous messages key under the sentinel.
pub fn target_key(message: &Message, roster: &Roster) -> String {
    match resolve(message, roster) {
        RouteDecision::Agent { agent_id, .. } => agent_id,
        RouteDecision::Team { leader, .. } => leader,
        RouteDecision::Swarm { swarm_id, .. } => format!("swarm:{swarm_id}"),
        RouteDecision::Ambiguous => AMBIGUOUS_KEY.to_string(),
    }
}

/// One teammate mention extracted from a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub agent_id: String,
    /// Text immediately following the mention, up to the next teammate
    /// mention or end of response.
    pub body: String,
}

/// Scan a response for teammate mentions, in order of first occurrence.
pub fn extract_mentions(response: &str, teammates: &[String]) -> Vec<Mention> {
    // Every teammate-mention occurrence, as (start, end, id).
    let occurrences: Vec<(usize, usize, &str)> = mention_pattern()
        .captures_iter(response)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let id = caps.get(1)?.as_str();
            teammates
                .iter()
                .any(|t| t == id)
                .then_some((whole.start(), whole.end(), id))
        })
        .collect();

    let mut mentions = Vec::new();
    let mut seen: Vec<&str> = Vec::new();

    for (i, &(_, end, id)) in occurrences.iter().enumerate() {
        if seen.contains(&id) {
            continue;
        }
        seen.push(id);
        let body_end = occurrences
            .get(i + 1)
            .map(|&(next_start, _, _)| next_start)
            .unwrap_or(response.len());
        mentions.push(Mention {
            agent_id: id.to_string(),
            body: response[end..body_end].trim().to_string(),
        });
    }

    mentions
}
