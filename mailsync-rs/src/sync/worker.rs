//! Fetch worker: the consuming half of the sync pipeline.

use crate::error::SyncError;
use crate::gmail::transform;
use crate::source::MessageSource;
use crate::storage::MessageStore;
use crate::sync::retry::{self, RetryPolicy};
use crate::sync::RunCounters;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Worker loop: dequeue one identifier, fetch with retry, transform, upsert,
/// record the outcome. Exits when the queue closes or cancellation is
/// requested; a failure on one item never takes the worker down.
pub(crate) async fn run<S>(
    worker_id: usize,
    source: Arc<S>,
    store: MessageStore,
    policy: RetryPolicy,
    counters: Arc<RunCounters>,
    cancel: CancellationToken,
    queue: Arc<Mutex<mpsc::Receiver<String>>>,
) where
    S: MessageSource + ?Sized + 'static,
{
    loop {
        // Cancellation stops new work from starting; whatever is already
        // past this point drains normally.
        let next = {
            let mut rx = queue.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = rx.recv() => item,
            }
        };

        let Some(id) = next else {
            debug!(worker_id, "worker draining, queue closed or cancelled");
            break;
        };

        process_one(&id, source.as_ref(), &store, &policy, &counters, &cancel).await;
    }
}

async fn process_one<S>(
    id: &str,
    source: &S,
    store: &MessageStore,
    policy: &RetryPolicy,
    counters: &RunCounters,
    cancel: &CancellationToken,
) where
    S: MessageSource + ?Sized,
{
    let fetched = retry::with_retry(policy, cancel, "fetch message", || source.fetch(id)).await;

    let payload = match fetched {
        Ok(payload) => payload,
        // Backoff interrupted by shutdown: the item was never completed and
        // is not a failure; the uncommitted cursor re-covers it next run.
        Err(SyncError::Cancelled) => return,
        Err(err) => {
            warn!(message_id = id, error = %err, "fetch failed");
            counters.record_failed(id, err.to_string());
            return;
        }
    };
    counters.record_fetched();

    let record = match transform::record_from_message(&payload) {
        Ok(record) => record,
        Err(err) => {
            warn!(message_id = id, error = %err, "payload rejected by transform");
            counters.record_failed(id, err.to_string());
            return;
        }
    };

    match store.upsert(&record).await {
        Ok(result) => counters.record_stored(result),
        Err(err) => {
            // Per-record storage failures (constraint violations included)
            // abort this record only.
            warn!(message_id = id, error = %err, "store write failed");
            counters.record_failed(id, err.to_string());
        }
    }
}
