//! Swarm reduce phase (no shuffle): collapse batch results into one text.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

use super::{render_template, SwarmCtx};
use crate::domain::models::ReduceStrategy;

/// Chunk size for hierarchical reduction and the shuffle merge fan-in.
pub(crate) const HIERARCHICAL_REDUCE_FANIN: usize = 20;

const BATCH_SEPARATOR: &str = "\n\n---\n\n";

const DEFAULT_SUMMARIZE_PROMPT: &str = "Summarize the following results into a single \
coherent report. Preserve every distinct finding.\n\n{{items}}";

/// Reduce successful batch results, preserved in batch-index order.
pub(crate) async fn run(ctx: &SwarmCtx<'_>, results: Vec<String>) -> String {
    match ctx.spec.reduce_strategy() {
        ReduceStrategy::Concatenate => results.join(BATCH_SEPARATOR),
        ReduceStrategy::Summarize => summarize(ctx, results.join(BATCH_SEPARATOR)).await,
        ReduceStrategy::Hierarchical => hierarchical(ctx, results).await,
    }
}

/// One reducer invocation over the joined results. Falls back to the joined
/// text when the invocation fails.
async fn summarize(ctx: &SwarmCtx<'_>, joined: String) -> String {
    let template = ctx
        .spec
        .reduce
        .as_ref()
        .and_then(|r| r.prompt.as_deref())
        .unwrap_or(DEFAULT_SUMMARIZE_PROMPT);
    let prompt = render_template(
        template,
        &[
            ("items", joined.clone()),
            ("user_message", ctx.user_message.to_string()),
        ],
    );

    match ctx.invoke_fresh(ctx.reducer_agent, prompt).await {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "summarize reduce failed; returning concatenated results");
            joined
        }
    }
}

/// Reduce in rounds of fan-in-sized chunks until one summary remains.
///
/// Chunk reductions within a round run concurrently under the pool bound; a
/// failed chunk falls back to its own concatenation and the rounds continue.
async fn hierarchical(ctx: &SwarmCtx<'_>, results: Vec<String>) -> String {
    let mut current = results;

    loop {
        let chunks: Vec<Vec<String>> = current
            .chunks(HIERARCHICAL_REDUCE_FANIN)
            .map(<[String]>::to_vec)
            .collect();

        let semaphore = Arc::new(Semaphore::new(ctx.spec.concurrency));
        let reductions = chunks.into_iter().map(|chunk| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let joined = chunk.join(BATCH_SEPARATOR);
                let Ok(_permit) = semaphore.acquire().await else {
                    return joined;
                };
                summarize(ctx, joined).await
            }
        });
        current = futures::future::join_all(reductions).await;

        if current.len() == 1 {
            return current.remove(0);
        }
    }
}
