//! Swarm input resolution.
//!
//! Resolves the item list for a swarm run, in priority order: an inline
//! JSON array in the user message, attached files, the configured input
//! command with `{{param}}` substitution, then a backtick-delimited inline
//! command.

use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::{debug, warn};

use super::SwarmError;
use crate::domain::models::{InputFormat, Message, SwarmSpec};

fn repo_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b([A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+)\b").expect("repo pattern")
    })
}

fn limit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b(\d+)\b").expect("limit pattern"))
}

fn pair_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b(\w+)=(\S+)").expect("pair pattern"))
}

fn backtick_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"`([^`]+)`").expect("backtick pattern"))
}

/// Resolve the swarm's input items.
pub(crate) async fn resolve(
    spec: &SwarmSpec,
    payload: &str,
    origin: &Message,
    command_cwd: &Path,
    max_items: usize,
    max_output_bytes: usize,
) -> Result<Vec<String>, SwarmError> {
    let format = spec
        .input
        .as_ref()
        .map(|input| input.format)
        .unwrap_or_default();

    let items = if let Some(items) = inline_json_items(payload) {
        items
    } else if let Some(items) = attached_file_items(origin).await {
        items
    } else if let Some(input) = &spec.input {
        let command = substitute_params(&input.command, payload);
        let stdout = run_shell(&command, command_cwd, max_output_bytes).await?;
        parse_output(&stdout, input.format)
    } else if let Some(caps) = backtick_pattern().captures(payload) {
        let stdout = run_shell(&caps[1], command_cwd, max_output_bytes).await?;
        parse_output(&stdout, format)
    } else {
        Vec::new()
    };

    if items.is_empty() {
        return Err(SwarmError::NoInput);
    }
    if items.len() > max_items {
        return Err(SwarmError::TooManyItems {
            count: items.len(),
            cap: max_items,
        });
    }
    Ok(items)
}

/// First `[ ... ]` span of the message parsed as a JSON array.
fn inline_json_items(payload: &str) -> Option<Vec<String>> {
    let start = payload.find('[')?;
    let end = payload.rfind(']')?;
    if end <= start {
        return None;
    }
    let Ok(Value::Array(values)) = serde_json::from_str(&payload[start..=end]) else {
        return None;
    };
    Some(values.iter().map(stringify).collect())
}

/// One item per line of each attached file, or its elements when a file
/// holds a JSON array. Unreadable files are skipped.
async fn attached_file_items(origin: &Message) -> Option<Vec<String>> {
    let mut items = Vec::new();
    for path in origin.attached_files() {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(path, error = %e, "skipping unreadable attached file");
                continue;
            }
        };
        if let Ok(Value::Array(values)) = serde_json::from_str::<Value>(&content) {
            items.extend(values.iter().map(stringify));
        } else {
            items.extend(non_empty_lines(&content));
        }
    }
    (!items.is_empty()).then_some(items)
}

/// Substitute `{{param}}` placeholders from the user message.
///
/// `{{repo}}` matches an `owner/name` token, `{{limit}}` a numeric token;
/// explicit `key=value` pairs are substituted verbatim.
fn substitute_params(command: &str, payload: &str) -> String {
    let mut rendered = command.to_string();

    for caps in pair_pattern().captures_iter(payload) {
        rendered = rendered.replace(&format!("{{{{{}}}}}", &caps[1]), &caps[2]);
    }
    if rendered.contains("{{repo}}") {
        if let Some(caps) = repo_pattern().captures(payload) {
            rendered = rendered.replace("{{repo}}", &caps[1]);
        }
    }
    if rendered.contains("{{limit}}") {
        if let Some(caps) = limit_pattern().captures(payload) {
            rendered = rendered.replace("{{limit}}", &caps[1]);
        }
    }

    rendered
}

async fn run_shell(
    command: &str,
    cwd: &Path,
    max_output_bytes: usize,
) -> Result<String, SwarmError> {
    debug!(command, cwd = %cwd.display(), "running input command");

    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| SwarmError::InputCommand(e.to_string()))?;

    if !output.status.success() {
        return Err(SwarmError::InputCommand(format!(
            "exit {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let mut stdout = output.stdout;
    if stdout.len() > max_output_bytes {
        warn!(cap = max_output_bytes, "input command output truncated at buffer cap");
        stdout.truncate(max_output_bytes);
    }
    Ok(String::from_utf8_lossy(&stdout).into_owned())
}

fn parse_output(stdout: &str, format: InputFormat) -> Vec<String> {
    match format {
        InputFormat::Lines => non_empty_lines(stdout),
        InputFormat::JsonArray => match serde_json::from_str::<Value>(stdout.trim()) {
            Ok(Value::Array(values)) => values.iter().map(stringify).collect(),
            _ => {
                warn!("input command output did not parse as a JSON array");
                Vec::new()
            }
        },
    }
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::InputSpec;

    fn spec(input: Option<InputSpec>) -> SwarmSpec {
        let mut spec: SwarmSpec = serde_json::from_str(
            r#"{"id":"s","name":"S","agent":"w","prompt_template":"go"}"#,
        )
        .unwrap();
        spec.input = input;
        spec
    }

    fn msg(text: &str) -> Message {
        Message::new("t", "u", text, "m1")
    }

    #[tokio::test]
    async fn inline_array_wins() {
        let items = resolve(
            &spec(None),
            "crunch these [1, 2, \"three\"]",
            &msg("x"),
            Path::new("."),
            10_000,
            1 << 20,
        )
        .await
        .unwrap();
        assert_eq!(items, vec!["1", "2", "three"]);
    }

    #[tokio::test]
    async fn attached_files_split_lines_or_json() {
        let dir = tempfile::tempdir().unwrap();
        let lines_file = dir.path().join("a.txt");
        std::fs::write(&lines_file, "one\n\ntwo\n").unwrap();
        let json_file = dir.path().join("b.json");
        std::fs::write(&json_file, r#"["three", 4]"#).unwrap();

        let mut message = msg("no inline array here");
        message.files = Some(vec![
            lines_file.display().to_string(),
            json_file.display().to_string(),
        ]);

        let items = resolve(&spec(None), "payload", &message, Path::new("."), 10_000, 1 << 20)
            .await
            .unwrap();
        assert_eq!(items, vec!["one", "two", "three", "4"]);
    }

    #[tokio::test]
    async fn configured_command_with_substitution() {
        let input = InputSpec {
            command: "echo {{repo}}; echo {{limit}}; echo {{label}}".into(),
            format: InputFormat::Lines,
        };
        let items = resolve(
            &spec(Some(input)),
            "scan rust-lang/cargo top 7 label=bug",
            &msg("x"),
            Path::new("."),
            10_000,
            1 << 20,
        )
        .await
        .unwrap();
        assert_eq!(items, vec!["rust-lang/cargo", "7", "bug"]);
    }

    #[tokio::test]
    async fn backtick_command_runs() {
        let items = resolve(
            &spec(None),
            "process `printf 'a\\nb\\n'` please",
            &msg("x"),
            Path::new("."),
            10_000,
            1 << 20,
        )
        .await
        .unwrap();
        assert_eq!(items, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn empty_resolution_is_no_input() {
        let err = resolve(&spec(None), "nothing here", &msg("x"), Path::new("."), 10_000, 1 << 20)
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::NoInput));
    }

    #[tokio::test]
    async fn cap_is_enforced() {
        let err = resolve(
            &spec(None),
            "[1,2,3,4,5]",
            &msg("x"),
            Path::new("."),
            3,
            1 << 20,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SwarmError::TooManyItems { count: 5, cap: 3 }));
    }

    #[tokio::test]
    async fn failing_command_surfaces_stderr() {
        let input = InputSpec {
            command: "echo nope >&2; exit 3".into(),
            format: InputFormat::Lines,
        };
        let err = resolve(&spec(Some(input)), "x", &msg("x"), Path::new("."), 10_000, 1 << 20)
            .await
            .unwrap_err();
        match err {
            SwarmError::InputCommand(message) => {
                assert!(message.contains("exit 3"));
                assert!(message.contains("nope"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn json_array_output_parsing() {
        let items = parse_output(r#"[{"a":1}, "b"]"#, InputFormat::JsonArray);
        assert_eq!(items, vec![r#"{"a":1}"#, "b"]);
    }
}
