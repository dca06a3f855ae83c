//! Response delivery into the outgoing queue.
//!
//! Owns the last mile every response passes through: send-file marker
//! extraction, the response truncation law, attachment handling, and the
//! outgoing filename convention.

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

use crate::domain::models::{Config, Response};

/// Responses longer than the limit are cut to this many characters.
const TRUNCATE_TO: usize = 3900;

const TRUNCATION_NOTICE: &str = "\n\n[Response truncated...]";

fn send_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[send_file:\s*([^\]]+)\]").expect("send_file pattern"))
}

/// Extract `[send_file: PATH]` markers from worker output.
///
/// All markers are stripped from the text; only paths that exist become
/// attachments. Non-existent paths are silently dropped.
pub fn extract_send_files(text: &str) -> (String, Vec<PathBuf>) {
    let mut attachments = Vec::new();

    for caps in send_file_pattern().captures_iter(text) {
        let path = PathBuf::from(caps[1].trim());
        if path.exists() {
            attachments.push(path);
        } else {
            debug!(path = %caps[1].trim(), "dropping send_file marker for missing path");
        }
    }

    let cleaned = send_file_pattern().replace_all(text, "").into_owned();
    (cleaned, attachments)
}

/// How an over-long response is handled.
#[derive(Debug, Clone)]
pub enum DeliveryStyle {
    /// Truncate inline with a notice.
    Standard,
    /// Persist the full text under `files/` and attach it; the inline text
    /// becomes the leading block plus an attachment notice.
    SwarmReport { file_stem: String },
}

/// Writes responses into the outgoing queue directory.
pub struct Outbox {
    outgoing_dir: PathBuf,
    files_dir: PathBuf,
    response_limit: usize,
}

impl Outbox {
    pub fn new(config: &Config) -> Self {
        Self {
            outgoing_dir: config.outgoing_dir(),
            files_dir: config.files_dir(),
            response_limit: config.limits.response_limit,
        }
    }

    /// Deliver a response: markers out, truncation law applied, JSON file
    /// dropped into `outgoing/`.
    pub async fn deliver(&self, mut response: Response, style: DeliveryStyle) -> Result<PathBuf> {
        let (cleaned, extracted) = extract_send_files(&response.message);
        response.message = cleaned;

        let mut files: Vec<String> = response.files.take().unwrap_or_default();
        files.extend(extracted.iter().map(|p| p.display().to_string()));

        if response.message.chars().count() > self.response_limit {
            match &style {
                DeliveryStyle::Standard => {
                    response.message = truncate_chars(&response.message, TRUNCATE_TO);
                    response.message.push_str(TRUNCATION_NOTICE);
                }
                DeliveryStyle::SwarmReport { file_stem } => {
                    let report = self.persist_report(file_stem, &response.message).await?;
                    response.message = report_notice(&response.message, &report);
                    files.push(report.display().to_string());
                }
            }
        }

        files.dedup();
        if !files.is_empty() {
            response.files = Some(files);
        }

        let name = outgoing_name(&response.channel, &response.message_id);
        let path = self.outgoing_dir.join(&name);
        let tmp = self.outgoing_dir.join(format!("{name}.tmp"));

        let body = serde_json::to_vec_pretty(&response)?;
        tokio::fs::create_dir_all(&self.outgoing_dir).await?;
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("Failed to write outgoing response {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to publish outgoing response {}", path.display()))?;

        Ok(path)
    }

    async fn persist_report(&self, file_stem: &str, text: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.files_dir).await?;
        let path = self.files_dir.join(format!("{file_stem}.md"));
        tokio::fs::write(&path, text)
            .await
            .with_context(|| format!("Failed to persist report {}", path.display()))?;
        Ok(path)
    }
}

/// Leading block of the report (up to the first blank line) plus a notice.
fn report_notice(full_text: &str, report_path: &Path) -> String {
    let head = full_text.split("\n\n").next().unwrap_or_default();
    format!(
        "{head}\n\nThe full report ({} characters) is attached: {}",
        full_text.chars().count(),
        report_path.display()
    )
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Outgoing filename convention. The heartbeat channel keeps its bare
/// `<messageId>.json` form.
pub fn outgoing_name(channel: &str, message_id: &str) -> String {
    if channel == "heartbeat" {
        format!("{message_id}.json")
    } else {
        format!("{channel}_{message_id}_{}.json", Utc::now().timestamp_millis())
    }
}
