//! Swarm shuffle phase: re-partition map results by key and reduce each
//! partition.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

use super::reduce::HIERARCHICAL_REDUCE_FANIN;
use super::{render_template, SwarmCtx};
use crate::domain::models::{MultiKey, ShuffleSpec};
use crate::domain::ports::Event;

/// Partition for items carrying no usable key value.
pub(crate) const UNKEYED_PARTITION: &str = "_unkeyed";

const DEFAULT_PARTITION_PROMPT: &str = "The following {{item_count}} items share the key \
\"{{partition_key}}\". Identify duplicates and near-duplicates among them and produce a \
deduplicated summary of the group.\n\nItems:\n{{items}}";

const DEFAULT_MERGE_PROMPT: &str = "Combine the following {{partition_count}} partition \
summaries into a single coherent report. Preserve every distinct finding.\n\n{{items}}";

/// Run the shuffle: parse, key, group, sub-split, partition-reduce, merge.
pub(crate) async fn run(
    ctx: &SwarmCtx<'_>,
    shuffle: &ShuffleSpec,
    batch_results: &[String],
) -> String {
    let mut parsed = Vec::new();
    let mut dropped_results = 0usize;
    for result in batch_results {
        let items = parse_structured_items(result);
        if items.is_empty() {
            warn!("dropping batch result with no parseable structured items");
            dropped_results += 1;
        }
        parsed.extend(items);
    }

    let (partitions, duplicated_items) = group_items(parsed, shuffle);
    let partitions = sub_split(partitions, shuffle.max_partition_size);

    ctx.events
        .emit(Event::new("swarm", "swarm_shuffle_done").with_payload(json!({
            "partitions": partitions.len(),
            "duplicatedItems": duplicated_items,
            "droppedResults": dropped_results,
        })))
        .await;

    if partitions.is_empty() {
        return "No structured items could be parsed from the map results.".to_string();
    }

    ctx.events
        .emit(
            Event::new("swarm", "swarm_shuffle_reduce_start")
                .with_payload(json!({"partitions": partitions.len()})),
        )
        .await;

    // Partition reduce under the same bounded-concurrency pool as the map
    // phase. BTreeMap iteration gives lexicographic key order.
    let semaphore = Arc::new(Semaphore::new(ctx.spec.concurrency));
    let reduces = partitions.iter().map(|(key, items)| {
        let semaphore = Arc::clone(&semaphore);
        async move {
            let Ok(_permit) = semaphore.acquire().await else {
                return (key.clone(), partition_failure(key, "worker pool closed"));
            };
            let prompt = partition_prompt(ctx, shuffle, key, items);
            match ctx.invoke_fresh(ctx.reducer_agent, prompt).await {
                Ok(text) => (key.clone(), text),
                Err(err) => {
                    warn!(partition = %key, error = %err, "partition reduce failed");
                    (key.clone(), partition_failure(key, &err.to_string()))
                }
            }
        }
    });
    let reduced: Vec<(String, String)> = futures::future::join_all(reduces).await;

    ctx.events
        .emit(
            Event::new("swarm", "swarm_shuffle_reduce_done")
                .with_payload(json!({"partitions": reduced.len()})),
        )
        .await;

    merge(ctx, shuffle, &reduced).await
}

fn partition_failure(key: &str, message: &str) -> String {
    format!("[Partition \"{key}\" failed: {message}]")
}

fn partition_prompt(
    ctx: &SwarmCtx<'_>,
    shuffle: &ShuffleSpec,
    key: &str,
    items: &[Value],
) -> String {
    let template = shuffle
        .reduce_prompt
        .as_deref()
        .unwrap_or(DEFAULT_PARTITION_PROMPT);
    let rendered_items: Vec<String> = items
        .iter()
        .map(|item| serde_json::to_string(item).unwrap_or_default())
        .collect();
    render_template(
        template,
        &[
            ("partition_key", key.to_string()),
            ("items", rendered_items.join("\n")),
            ("item_count", items.len().to_string()),
            ("user_message", ctx.user_message.to_string()),
        ],
    )
}

/// Final merge: concatenate the sorted partition results and run the reducer
/// over them once. Falls back to the concatenation when the merge
/// invocation fails or the partition count exceeds the fan-in.
async fn merge(ctx: &SwarmCtx<'_>, shuffle: &ShuffleSpec, reduced: &[(String, String)]) -> String {
    let concatenated = reduced
        .iter()
        .map(|(key, result)| format!("## Partition: {key}\n\n{result}"))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    if reduced.len() > HIERARCHICAL_REDUCE_FANIN {
        warn!(
            partitions = reduced.len(),
            fanin = HIERARCHICAL_REDUCE_FANIN,
            "partition count exceeds merge fan-in; returning concatenation"
        );
        return concatenated;
    }

    let template = shuffle.merge_prompt.as_deref().unwrap_or(DEFAULT_MERGE_PROMPT);
    let prompt = render_template(
        template,
        &[
            ("items", concatenated.clone()),
            ("partition_count", reduced.len().to_string()),
            ("user_message", ctx.user_message.to_string()),
        ],
    );

    match ctx.invoke_fresh(ctx.reducer_agent, prompt).await {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "final merge failed; returning concatenated partitions");
            concatenated
        }
    }
}

/// Parse one batch result into structured items.
///
/// Tries, in order: the whole result as JSON (array → its object elements,
/// single object → itself), the first bracketed span as an array, then a
/// per-line scan for object literals. Results matching none of these yield
/// nothing and are dropped from shuffling.
pub(crate) fn parse_structured_items(result: &str) -> Vec<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(result.trim()) {
        match value {
            Value::Array(values) => {
                return values.into_iter().filter(Value::is_object).collect()
            }
            Value::Object(_) => return vec![value],
            _ => {}
        }
    }

    if let (Some(start), Some(end)) = (result.find('['), result.rfind(']')) {
        if end > start {
            if let Ok(Value::Array(values)) = serde_json::from_str::<Value>(&result[start..=end]) {
                return values.into_iter().filter(Value::is_object).collect();
            }
        }
    }

    result
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter(Value::is_object)
        .collect()
}

/// Keys produced by one item: one for a scalar value, all non-empty
/// lowercased entries for an array, none for missing/null/empty.
pub(crate) fn extract_keys(item: &Value, key_field: &str) -> Vec<String> {
    match item.get(key_field) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(values)) => {
            let mut keys = Vec::new();
            for value in values {
                if let Some(key) = scalar_key(value) {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
            }
            keys
        }
        Some(value) => scalar_key(value).into_iter().collect(),
    }
}

fn scalar_key(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    let key = raw.trim().to_lowercase();
    (!key.is_empty()).then_some(key)
}

/// Group items by key. Returns the partitions and the count of items that
/// landed under more than one key.
pub(crate) fn group_items(
    items: Vec<Value>,
    shuffle: &ShuffleSpec,
) -> (BTreeMap<String, Vec<Value>>, usize) {
    let mut partitions: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    let mut duplicated_items = 0usize;

    for item in items {
        let keys = extract_keys(&item, &shuffle.key_field);
        if keys.is_empty() {
            partitions
                .entry(UNKEYED_PARTITION.to_string())
                .or_default()
                .push(item);
            continue;
        }

        match shuffle.multi_key {
            MultiKey::First => {
                partitions.entry(keys[0].clone()).or_default().push(item);
            }
            MultiKey::Duplicate => {
                if keys.len() > 1 {
                    duplicated_items += 1;
                }
                for key in keys {
                    partitions.entry(key).or_default().push(item.clone());
                }
            }
        }
    }

    (partitions, duplicated_items)
}

/// Split oversized partitions into `<key>_partN` slices of at most
/// `max_partition_size` items each.
pub(crate) fn sub_split(
    partitions: BTreeMap<String, Vec<Value>>,
    max_partition_size: usize,
) -> BTreeMap<String, Vec<Value>> {
    let mut out = BTreeMap::new();
    for (key, items) in partitions {
        if items.len() <= max_partition_size {
            out.insert(key, items);
        } else {
            for (i, chunk) in items.chunks(max_partition_size.max(1)).enumerate() {
                out.insert(format!("{key}_part{}", i + 1), chunk.to_vec());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shuffle_spec(multi_key: MultiKey) -> ShuffleSpec {
        ShuffleSpec {
            key_field: "tags".into(),
            multi_key,
            max_partition_size: 200,
            reduce_prompt: None,
            merge_prompt: None,
        }
    }

    #[test]
    fn parses_whole_json_array() {
        let items = parse_structured_items(r#"[{"a":1}, {"a":2}, 3]"#);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn parses_single_object() {
        let items = parse_structured_items(r#"{"a":1}"#);
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn parses_embedded_array() {
        let items = parse_structured_items("Here are the findings:\n[{\"a\":1},{\"a\":2}]\nDone.");
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn parses_object_lines() {
        let items = parse_structured_items("prose\n{\"a\":1}\nmore prose\n  {\"a\":2}\n");
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn unparseable_yields_nothing() {
        assert!(parse_structured_items("just prose, no structure").is_empty());
    }

    #[test]
    fn key_extraction_rules() {
        let item = serde_json::json!({"tags": [" X ", "y", "", "x"]});
        assert_eq!(extract_keys(&item, "tags"), vec!["x", "y"]);

        let item = serde_json::json!({"tags": "Solo"});
        assert_eq!(extract_keys(&item, "tags"), vec!["solo"]);

        let item = serde_json::json!({"tags": 7});
        assert_eq!(extract_keys(&item, "tags"), vec!["7"]);

        let item = serde_json::json!({"tags": null});
        assert!(extract_keys(&item, "tags").is_empty());

        let item = serde_json::json!({"other": "x"});
        assert!(extract_keys(&item, "tags").is_empty());

        let item = serde_json::json!({"tags": "   "});
        assert!(extract_keys(&item, "tags").is_empty());
    }

    #[test]
    fn duplicate_grouping_counts_multi_key_items() {
        let a = serde_json::json!({"id":"A","tags":["x","y"]});
        let b = serde_json::json!({"id":"B","tags":["y"]});
        let (partitions, duplicated) =
            group_items(vec![a.clone(), b.clone()], &shuffle_spec(MultiKey::Duplicate));

        assert_eq!(duplicated, 1);
        assert_eq!(partitions["x"], vec![a.clone()]);
        assert_eq!(partitions["y"], vec![a, b]);
    }

    #[test]
    fn first_grouping_uses_only_first_key() {
        let a = serde_json::json!({"id":"A","tags":["x","y"]});
        let (partitions, duplicated) = group_items(vec![a.clone()], &shuffle_spec(MultiKey::First));
        assert_eq!(duplicated, 0);
        assert_eq!(partitions["x"], vec![a]);
        assert!(!partitions.contains_key("y"));
    }

    #[test]
    fn unkeyed_items_form_their_own_partition() {
        let a = serde_json::json!({"id":"A"});
        let (partitions, _) = group_items(vec![a.clone()], &shuffle_spec(MultiKey::Duplicate));
        assert_eq!(partitions[UNKEYED_PARTITION], vec![a]);
    }

    #[test]
    fn sub_split_preserves_items_and_caps_size() {
        let items: Vec<Value> = (0..7).map(|i| serde_json::json!({"i": i})).collect();
        let mut partitions = BTreeMap::new();
        partitions.insert("k".to_string(), items.clone());

        let split = sub_split(partitions, 3);
        assert_eq!(split.len(), 3);
        assert!(split.values().all(|chunk| chunk.len() <= 3));

        // Concatenation across parts equals the pre-split partition.
        let mut rejoined = Vec::new();
        for part in ["k_part1", "k_part2", "k_part3"] {
            rejoined.extend(split[part].clone());
        }
        assert_eq!(rejoined, items);
    }

    #[test]
    fn small_partitions_are_untouched() {
        let mut partitions = BTreeMap::new();
        partitions.insert("k".to_string(), vec![serde_json::json!({"i": 1})]);
        let split = sub_split(partitions.clone(), 3);
        assert_eq!(split, partitions);
    }
}
