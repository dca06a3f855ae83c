//! Swarm map phase: the bounded worker pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{render_template, SwarmCtx};
use crate::domain::models::{Batch, BatchStatus, Message, Response};
use crate::services::outbox::{DeliveryStyle, Outbox};

/// Extra attempts after the first failure.
const BATCH_RETRIES: u32 = 2;

/// Run every batch through the worker pool.
///
/// At most `concurrency` workers run at once; the semaphore's waiters are
/// released FIFO and permits release on every exit path. Batches complete
/// out of order but return in index order.
pub(crate) async fn run_map(
    ctx: &SwarmCtx<'_>,
    batches: Vec<Batch>,
    outbox: &Outbox,
    origin: &Message,
    started: Instant,
) -> Vec<Batch> {
    let total = batches.len();
    let semaphore = Arc::new(Semaphore::new(ctx.spec.concurrency));
    let completed = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    let runs = batches.into_iter().map(|mut batch| {
        let semaphore = Arc::clone(&semaphore);
        let completed = &completed;
        let failed = &failed;
        async move {
            let Ok(_permit) = semaphore.acquire().await else {
                batch.status = BatchStatus::Failed;
                batch.error = Some("worker pool closed".to_string());
                return batch;
            };

            batch.status = BatchStatus::Running;
            let prompt = render_batch_prompt(ctx, &batch, total);

            match invoke_with_retries(ctx, prompt, batch.index).await {
                Ok(text) => {
                    batch.result = Some(text);
                    batch.status = BatchStatus::Completed;
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    maybe_report_progress(
                        ctx,
                        outbox,
                        origin,
                        done,
                        failed.load(Ordering::SeqCst),
                        total,
                        started,
                    )
                    .await;
                }
                Err(message) => {
                    warn!(batch = batch.index, error = %message, "batch failed terminally");
                    batch.error = Some(message);
                    batch.status = BatchStatus::Failed;
                    failed.fetch_add(1, Ordering::SeqCst);
                }
            }
            batch
        }
    });

    futures::future::join_all(runs).await
}

fn render_batch_prompt(ctx: &SwarmCtx<'_>, batch: &Batch, total: usize) -> String {
    render_template(
        &ctx.spec.prompt_template,
        &[
            ("items", batch.items.join("\n")),
            (
                "items_json",
                serde_json::to_string(&batch.items).unwrap_or_default(),
            ),
            ("batch_number", (batch.index + 1).to_string()),
            ("batch_index", batch.index.to_string()),
            ("total_batches", total.to_string()),
            ("batch_size", ctx.spec.batch_size.to_string()),
            ("user_message", ctx.user_message.to_string()),
        ],
    )
}

/// Invoke the map worker, retrying transient failures.
async fn invoke_with_retries(
    ctx: &SwarmCtx<'_>,
    prompt: String,
    batch_index: usize,
) -> Result<String, String> {
    let mut last_error = String::new();

    for attempt in 0..=BATCH_RETRIES {
        match ctx.invoke_fresh(ctx.worker_agent, prompt.clone()).await {
            Ok(text) => return Ok(text),
            Err(err) => {
                last_error = err.to_string();
                if err.is_terminal() {
                    break;
                }
                if attempt < BATCH_RETRIES {
                    debug!(batch = batch_index, attempt, error = %last_error, "retrying batch");
                    tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt + 1))).await;
                }
            }
        }
    }

    Err(last_error)
}

/// Every `progress_interval` completed batches, deliver a progress message
/// with counts and an ETA.
async fn maybe_report_progress(
    ctx: &SwarmCtx<'_>,
    outbox: &Outbox,
    origin: &Message,
    completed: usize,
    failed: usize,
    total: usize,
    started: Instant,
) {
    let interval = ctx.spec.progress_interval;
    if interval == 0 || completed % interval != 0 || completed == 0 {
        return;
    }

    let remaining = total.saturating_sub(completed + failed);
    let eta = if completed > 0 {
        let per_batch = started.elapsed() / completed as u32;
        super::format_elapsed(per_batch * remaining as u32)
    } else {
        "unknown".to_string()
    };

    let text = format!(
        "Swarm {}: {completed}/{total} batches done, {failed} failed. ETA {eta}.",
        ctx.spec.name
    );

    ctx.events
        .emit(
            crate::domain::ports::Event::new("swarm", "swarm_progress").with_payload(
                serde_json::json!({
                    "completed": completed,
                    "failed": failed,
                    "total": total,
                }),
            ),
        )
        .await;

    if let Err(e) = outbox
        .deliver(Response::answering(origin, text), DeliveryStyle::Standard)
        .await
    {
        warn!(error = %e, "failed to deliver swarm progress message");
    }
}
