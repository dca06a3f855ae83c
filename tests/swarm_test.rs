//! Swarm engine integration tests: map-reduce without shuffle, shuffle with
//! duplicate detection, partial failure, and pool bounds.

mod common;

use std::time::Duration;

use common::{agent, TestBed};
use switchboard::adapters::{MockWorker, ScriptedReply};
use switchboard::domain::models::{Message, SwarmSpec};

fn swarm(json: &str) -> SwarmSpec {
    serde_json::from_str(json).expect("valid swarm spec")
}

#[tokio::test]
async fn s5_swarm_without_shuffle_concatenates_batches() {
    let bed = TestBed::new(|config| {
        config.agents.push(agent("worker"));
        config.swarms.push(swarm(
            r#"{"id":"sum","name":"Sum","agent":"worker","concurrency":2,"batch_size":2,
                "prompt_template":"sum: {{items}}","reduce":{"strategy":"concatenate"}}"#,
        ));
    })
    .with_worker(MockWorker::new().with_default_reply(ScriptedReply::EchoAfter("sum: ".into())));
    bed.start();

    bed.write_incoming(&Message::new("t", "u", "@sum [1,2,3,4,5]", "m1"));

    let responses = bed.wait_for_outgoing(1).await;
    let message = &responses[0].message;

    // Stats header, then the three batch bodies joined by separators.
    assert!(message.starts_with("Swarm Sum: 5 items, 3/3 batches succeeded, 2 workers"));
    assert!(message.ends_with("1\n2\n\n---\n\n3\n4\n\n---\n\n5"));
    assert_eq!(bed.worker.invocation_count(), 3);
    assert!(bed.worker.invocations().iter().all(|i| i.fresh_conversation));
}

#[tokio::test]
async fn s6_swarm_shuffle_groups_by_key_and_merges_sorted() {
    let bed = TestBed::new(|config| {
        config.agents.push(agent("worker"));
        config.swarms.push(swarm(
            r#"{"id":"dedupe","name":"Dedupe","agent":"worker","batch_size":25,
                "prompt_template":"scan: {{items}}",
                "shuffle":{"key_field":"tags","multi_key":"duplicate","max_partition_size":10,
                           "reduce_prompt":"PARTITION {{partition_key}} ({{item_count}}):\n{{items}}",
                           "merge_prompt":"MERGE {{partition_count}}:\n{{items}}"}}"#,
        ));
    });
    // The single map batch emits two structured items; partition reduces and
    // the merge fall through to the default echo so prompts are observable.
    bed.worker.script(
        "worker",
        vec![ScriptedReply::text(
            r#"[{"id":"A","tags":["x","y"]},{"id":"B","tags":["y"]}]"#,
        )],
    );
    bed.start();

    bed.write_incoming(&Message::new("t", "u", "@swarm dedupe [\"a\",\"b\"]", "m1"));

    let responses = bed.wait_for_outgoing(1).await;
    let message = &responses[0].message;

    // Merge saw exactly two partition sections, sorted alphabetically.
    assert!(message.contains("MERGE 2:"));
    let x_pos = message.find("## Partition: x").unwrap();
    let y_pos = message.find("## Partition: y").unwrap();
    assert!(x_pos < y_pos);

    // Partition x holds only A; partition y holds A (duplicated) and B.
    assert!(message.contains("PARTITION x (1):"));
    assert!(message.contains("PARTITION y (2):"));

    // One map call, two partition reduces, one merge.
    assert_eq!(bed.worker.invocation_count(), 4);

    // The duplicated-items counter observed item A under two keys.
    let shuffle_events = bed.events.of_kind("swarm_shuffle_done");
    assert_eq!(shuffle_events[0].payload["duplicatedItems"], 1);
    assert_eq!(shuffle_events[0].payload["partitions"], 2);
}

#[tokio::test]
async fn item_conservation_across_batches() {
    let bed = TestBed::new(|config| {
        config.agents.push(agent("worker"));
        config.swarms.push(swarm(
            r#"{"id":"scan","name":"Scan","agent":"worker","batch_size":3,
                "prompt_template":"items: {{items}}","reduce":{"strategy":"concatenate"}}"#,
        ));
    })
    .with_worker(MockWorker::new().with_default_reply(ScriptedReply::EchoAfter("items: ".into())));
    bed.start();

    let items: Vec<String> = (0..7).map(|i| format!("\"item-{i}\"")).collect();
    bed.write_incoming(&Message::new(
        "t",
        "u",
        format!("@scan [{}]", items.join(",")),
        "m1",
    ));

    let responses = bed.wait_for_outgoing(1).await;
    let message = &responses[0].message;

    // Every item appears exactly once across the reducer input.
    for i in 0..7 {
        let needle = format!("item-{i}");
        assert_eq!(message.matches(&needle).count(), 1, "item {i} not conserved");
    }
}

#[tokio::test]
async fn pool_concurrency_is_bounded() {
    let bed = TestBed::new(|config| {
        config.agents.push(agent("worker"));
        config.swarms.push(swarm(
            r#"{"id":"slow","name":"Slow","agent":"worker","concurrency":2,"batch_size":1,
                "prompt_template":"b: {{items}}","reduce":{"strategy":"concatenate"}}"#,
        ));
    })
    .with_worker(MockWorker::new().with_delay(Duration::from_millis(100)));
    bed.start();

    bed.write_incoming(&Message::new("t", "u", "@slow [1,2,3,4,5,6]", "m1"));

    bed.wait_for_outgoing(1).await;
    assert_eq!(bed.worker.invocation_count(), 6);
    assert_eq!(bed.worker.max_concurrent(), 2);
}

#[tokio::test]
async fn all_batches_failing_fails_the_job() {
    let bed = TestBed::new(|config| {
        config.agents.push(agent("worker"));
        config.swarms.push(swarm(
            r#"{"id":"doomed","name":"Doomed","agent":"worker","batch_size":1,
                "prompt_template":"b: {{items}}"}"#,
        ));
    })
    .with_worker(MockWorker::new().with_default_reply(ScriptedReply::Fail("boom".into())));
    bed.start();

    bed.write_incoming(&Message::new("t", "u", "@doomed [1,2]", "m1"));

    let responses = bed.wait_for_outgoing(1).await;
    assert!(responses[0]
        .message
        .contains("Swarm doomed failed: All 2 batches failed"));
    // Two batches, each attempted three times.
    assert_eq!(bed.worker.invocation_count(), 6);

    let kinds: Vec<String> = bed.events.events().into_iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&"swarm_job_failed".to_string()));
}

#[tokio::test]
async fn progress_messages_every_interval() {
    let bed = TestBed::new(|config| {
        config.agents.push(agent("worker"));
        config.swarms.push(swarm(
            r#"{"id":"steady","name":"Steady","agent":"worker","concurrency":1,"batch_size":1,
                "prompt_template":"b: {{items}}","progress_interval":2,
                "reduce":{"strategy":"concatenate"}}"#,
        ));
    });
    bed.start();

    bed.write_incoming(&Message::new("t", "u", "@steady [1,2,3,4,5]", "m1"));

    // Progress at 2 and 4 completed batches, plus the final report.
    let responses = bed.wait_for_outgoing(3).await;
    let progress: Vec<_> = responses
        .iter()
        .filter(|r| r.message.contains("batches done"))
        .collect();
    assert_eq!(progress.len(), 2);
    assert!(progress.iter().any(|r| r.message.contains("2/5")));
    assert!(progress.iter().any(|r| r.message.contains("4/5")));
}

#[tokio::test]
async fn oversized_reports_are_attached_as_files() {
    let bed = TestBed::new(|config| {
        config.agents.push(agent("worker"));
        config.swarms.push(swarm(
            r#"{"id":"big","name":"Big","agent":"worker","batch_size":25,
                "prompt_template":"b: {{items}}","reduce":{"strategy":"concatenate"}}"#,
        ));
    });
    bed.worker
        .script("worker", vec![ScriptedReply::text("w".repeat(6000))]);
    bed.start();

    bed.write_incoming(&Message::new("t", "u", "@big [1]", "m1"));

    let responses = bed.wait_for_outgoing(1).await;
    let response = &responses[0];

    assert!(response.message.contains("attached"));
    assert!(response.message.chars().count() <= 4000);
    let files = response.files.as_ref().expect("report attachment");
    let report = std::fs::read_to_string(&files[0]).unwrap();
    assert!(report.starts_with("Swarm Big: 1 items"));
    assert!(report.contains(&"w".repeat(6000)));
}

#[tokio::test]
async fn summarize_reduce_invokes_the_reducer_agent() {
    let bed = TestBed::new(|config| {
        config.agents.push(agent("worker"));
        config.agents.push(agent("editor"));
        config.swarms.push(swarm(
            r#"{"id":"digest","name":"Digest","agent":"worker","batch_size":2,
                "prompt_template":"map: {{items}}",
                "reduce":{"strategy":"summarize","prompt":"SUMMARIZE:\n{{items}}","agent":"editor"}}"#,
        ));
    })
    .with_worker(MockWorker::new().with_default_reply(ScriptedReply::EchoAfter(": ".into())));
    bed.start();

    bed.write_incoming(&Message::new("t", "u", "@digest [1,2,3]", "m1"));

    let responses = bed.wait_for_outgoing(1).await;
    // The editor echoed the rendered summarize prompt over both batches.
    assert!(responses[0].message.contains("SUMMARIZE:"));

    let invocations = bed.worker.invocations();
    let editors: Vec<_> = invocations.iter().filter(|i| i.agent_id == "editor").collect();
    assert_eq!(editors.len(), 1);
    assert!(editors[0].prompt.contains("1\n2"));
    assert!(editors[0].prompt.contains("3"));
}
