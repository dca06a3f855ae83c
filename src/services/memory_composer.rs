//! Memory context composition.
//!
//! Builds the `[MEMORY]` block prepended to an agent's prompt from the
//! memory files in its working directory. The composer is pure over the
//! file system state at the moment of invocation: same files, same block.

use std::fs;
use std::path::Path;

use crate::domain::models::{Episode, Reflection, SkillIndex};

/// Knowledge files containing this substring count as empty.
const KNOWLEDGE_PLACEHOLDER: &str = "_No entries yet";

/// Reflections included in the block.
const RECENT_REFLECTIONS: usize = 10;

/// Episodes included in the block.
const TOP_EPISODES: usize = 3;

/// Minimum word length for relevance matching.
const MIN_MATCH_WORD_LEN: usize = 3;

/// Compose the memory block for one invocation.
///
/// Returns an empty string when no section has content; otherwise the block
/// ends with a blank line so it can be prepended to the user message as-is.
pub fn compose(agent_dir: &Path, user_message: &str) -> String {
    let memory_dir = agent_dir.join("memory");

    let mut sections = Vec::new();

    if let Some(knowledge) = knowledge_section(&memory_dir) {
        sections.push(format!("## Knowledge\n{knowledge}"));
    }
    if let Some(reflections) = reflections_section(&memory_dir) {
        sections.push(format!("## Recent reflections\n{reflections}"));
    }
    if let Some(episodes) = episodes_section(&memory_dir, user_message) {
        sections.push(format!("## Relevant episodes\n{episodes}"));
    }
    if let Some(skills) = skills_section(&memory_dir, user_message) {
        sections.push(format!("## Relevant skills\n{skills}"));
    }

    if sections.is_empty() {
        return String::new();
    }

    format!("[MEMORY]\n{}\n[/MEMORY]\n\n", sections.join("\n\n"))
}

/// Prepend the memory block (when non-empty) to the user message.
pub fn compose_prompt(agent_dir: &Path, user_message: &str) -> String {
    let block = compose(agent_dir, user_message);
    if block.is_empty() {
        user_message.to_string()
    } else {
        format!("{block}{user_message}")
    }
}

fn knowledge_section(memory_dir: &Path) -> Option<String> {
    let content = fs::read_to_string(memory_dir.join("knowledge.md")).ok()?;
    if content.trim().is_empty() || content.contains(KNOWLEDGE_PLACEHOLDER) {
        return None;
    }
    Some(content.trim_end().to_string())
}

fn reflections_section(memory_dir: &Path) -> Option<String> {
    let content = fs::read_to_string(memory_dir.join("reflections.jsonl")).ok()?;

    let parsed: Vec<Reflection> = content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();
    if parsed.is_empty() {
        return None;
    }

    let start = parsed.len().saturating_sub(RECENT_REFLECTIONS);
    let rendered: Vec<String> = parsed[start..].iter().map(Reflection::render).collect();
    Some(rendered.join("\n"))
}

fn episodes_section(memory_dir: &Path, user_message: &str) -> Option<String> {
    let content = fs::read_to_string(memory_dir.join("episodes.jsonl")).ok()?;
    let words = match_words(user_message);
    if words.is_empty() {
        return None;
    }

    let mut scored: Vec<(usize, Episode)> = content
        .lines()
        .filter_map(|line| serde_json::from_str::<Episode>(line).ok())
        .filter_map(|episode| {
            let haystack = episode.searchable_text();
            let score = words.iter().filter(|w| haystack.contains(w.as_str())).count();
            (score > 0).then_some((score, episode))
        })
        .collect();
    if scored.is_empty() {
        return None;
    }

    // Stable sort keeps file order among equal scores.
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    let rendered: Vec<String> = scored
        .iter()
        .take(TOP_EPISODES)
        .map(|(_, episode)| episode.render())
        .collect();
    Some(rendered.join("\n"))
}

fn skills_section(memory_dir: &Path, user_message: &str) -> Option<String> {
    let skills_dir = memory_dir.join("skills");
    let index_raw = fs::read_to_string(skills_dir.join("index.json")).ok()?;
    let index: SkillIndex = serde_json::from_str(&index_raw).ok()?;

    let message = user_message.to_lowercase();

    let mut entries = Vec::new();
    for (skill_id, description) in &index {
        let relevant = description
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > MIN_MATCH_WORD_LEN)
            .any(|w| message.contains(w));
        if !relevant {
            continue;
        }
        if let Ok(procedure) = fs::read_to_string(skills_dir.join(format!("{skill_id}.md"))) {
            entries.push(format!("### {skill_id}\n{}", procedure.trim_end()));
        }
    }

    if entries.is_empty() {
        return None;
    }
    Some(entries.join("\n\n"))
}

/// Lowercased user-message words longer than the match threshold.
fn match_words(user_message: &str) -> Vec<String> {
    user_message
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() > MIN_MATCH_WORD_LEN)
        .map(str::to_string)
        .collect()
}
