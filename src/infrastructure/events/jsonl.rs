//! Append-only JSONL event sink.

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::domain::ports::{Event, EventSink};

/// Writes events to date-stamped JSONL files under `events/`.
///
/// One record per line. Write failures are logged and swallowed so the
/// execution path never stalls on observability.
pub struct JsonlEventSink {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlEventSink {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    fn current_file(&self) -> PathBuf {
        self.dir
            .join(format!("{}.jsonl", Utc::now().format("%Y-%m-%d")))
    }

    async fn append(&self, event: &Event) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _held = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_file())
            .await?;
        file.write_all(&line).await?;
        Ok(())
    }
}

#[async_trait]
impl EventSink for JsonlEventSink {
    async fn emit(&self, event: Event) {
        if let Err(e) = self.append(&event).await {
            warn!(kind = %event.kind, error = %e, "failed to append event record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::EventLevel;
    use serde_json::json;

    #[tokio::test]
    async fn appends_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlEventSink::new(dir.path().to_path_buf());

        sink.emit(Event::new("dispatcher", "message_received").with_payload(json!({"n": 1})))
            .await;
        sink.emit(
            Event::new("swarm", "swarm_job_failed")
                .with_level(EventLevel::Error)
                .with_payload(json!({"n": 2})),
        )
        .await;

        let file = sink.current_file();
        let contents = std::fs::read_to_string(file).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Event = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.kind, "message_received");
        let second: Event = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.level, EventLevel::Error);
    }
}
