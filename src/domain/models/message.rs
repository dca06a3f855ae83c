//! Queue message records.
//!
//! Messages arrive as JSON files in `queue/incoming/` and responses leave
//! through `queue/outgoing/`. Wire keys are camelCase, matching the channel
//! clients that produce and consume the files.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Inbound message read from the incoming queue directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Channel identifier, opaque to the core.
    pub channel: String,

    /// Display name of the sender.
    pub sender: String,

    /// Raw user text, possibly carrying routing prefixes.
    pub message: String,

    /// Milliseconds since epoch.
    pub timestamp: i64,

    /// Unique per message; the on-disk filename derives from it.
    #[serde(rename = "messageId")]
    pub message_id: String,

    /// Pre-routed target agent, set by channel clients that already know
    /// where the message should go.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    /// Stable sender identifier, when the channel has one.
    #[serde(default, rename = "senderId", skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,

    /// Paths attached by the channel client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
}

impl Message {
    pub fn new(
        channel: impl Into<String>,
        sender: impl Into<String>,
        message: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender: sender.into(),
            message: message.into(),
            timestamp: Utc::now().timestamp_millis(),
            message_id: message_id.into(),
            agent: None,
            sender_id: None,
            files: None,
        }
    }

    /// Attached file paths, empty when the channel sent none.
    pub fn attached_files(&self) -> &[String] {
        self.files.as_deref().unwrap_or(&[])
    }
}

/// Outbound response deposited in the outgoing queue directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub channel: String,

    pub sender: String,

    /// Final text, possibly truncated per the response truncation law.
    pub message: String,

    /// The user text the response answers.
    #[serde(rename = "originalMessage")]
    pub original_message: String,

    /// Milliseconds since epoch at delivery time.
    pub timestamp: i64,

    #[serde(rename = "messageId")]
    pub message_id: String,

    /// Agent that produced the response, when a single one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    /// Attachments to deliver alongside the text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
}

impl Response {
    /// Build a response answering `message`, stamped now.
    pub fn answering(message: &Message, text: impl Into<String>) -> Self {
        Self {
            channel: message.channel.clone(),
            sender: message.sender.clone(),
            message: text.into(),
            original_message: message.message.clone(),
            timestamp: Utc::now().timestamp_millis(),
            message_id: message.message_id.clone(),
            agent: None,
            files: None,
        }
    }

    #[must_use]
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    #[must_use]
    pub fn with_files(mut self, files: Vec<String>) -> Self {
        if !files.is_empty() {
            self.files = Some(files);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_wire_keys_are_camel_case() {
        let msg = Message::new("t", "u", "hello", "m1");
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("messageId").is_some());
        assert!(json.get("message_id").is_none());
        // Absent optionals stay off the wire.
        assert!(json.get("senderId").is_none());
        assert!(json.get("agent").is_none());
    }

    #[test]
    fn response_round_trips() {
        let msg = Message::new("t", "u", "hello", "m1");
        let resp = Response::answering(&msg, "hi").with_agent("default");
        let json = serde_json::to_string(&resp).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(back.original_message, "hello");
        assert_eq!(back.agent.as_deref(), Some("default"));
    }
}
