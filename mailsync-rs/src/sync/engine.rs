//! The sync orchestrator: plans a pass, streams the listing into the worker
//! pool, reconciles deletions, and commits the checkpoint.

use crate::config::SyncSettings;
use crate::error::{Result, SyncError};
use crate::gmail::transform;
use crate::source::MessageSource;
use crate::storage::{MessageStore, RunStatus, SyncCheckpoint, UpsertResult};
use crate::sync::retry::{self, RetryPolicy};
use crate::sync::{worker, RunCounters, SyncMode, SyncReport};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// The failure-rate abort policy only kicks in once a run has this many
/// finished items; a two-message run with one bad payload should commit,
/// not abandon the cursor forever.
const MIN_ATTEMPTS_FOR_ABORT: u64 = 8;

/// Drives sync runs against one account's store. The checkpoint row is
/// exclusively owned here; workers only ever write message rows.
pub struct SyncEngine<S: MessageSource + ?Sized> {
    source: Arc<S>,
    store: MessageStore,
    settings: SyncSettings,
    cancel: CancellationToken,
}

impl<S: MessageSource + ?Sized + 'static> SyncEngine<S> {
    pub fn new(
        source: Arc<S>,
        store: MessageStore,
        settings: SyncSettings,
        cancel: CancellationToken,
    ) -> Self {
        SyncEngine {
            source,
            store,
            settings,
            cancel,
        }
    }

    /// Run one sync pass. Full mode when requested, when no cursor has ever
    /// been committed, or when the remote rejects the stored cursor as
    /// expired; incremental otherwise.
    pub async fn sync(&self, force_full: bool) -> Result<SyncReport> {
        let checkpoint = self.store.checkpoint().await?;

        let mode = if force_full || checkpoint.cursor.is_none() {
            SyncMode::Full
        } else {
            SyncMode::Incremental
        };

        match self.run_pass(mode, &checkpoint).await {
            Err(SyncError::CursorExpired) if mode == SyncMode::Incremental => {
                warn!("stored cursor rejected by the remote, falling back to full sync");
                self.run_pass(SyncMode::Full, &checkpoint).await
            }
            other => other,
        }
    }

    /// Targeted repair/backfill of a single message. Never touches the
    /// checkpoint or deletion reconciliation.
    pub async fn sync_one(&self, id: &str) -> Result<UpsertResult> {
        let policy = RetryPolicy::with_max_retries(self.settings.max_retries);
        let payload =
            retry::with_retry(&policy, &self.cancel, "fetch message", || {
                self.source.fetch(id)
            })
            .await?;

        let record = transform::record_from_message(&payload)?;
        self.store.upsert(&record).await
    }

    /// Explicit deletion reconciliation: enumerate the full remote id set and
    /// flag everything local that is absent from it.
    pub async fn sync_deleted(&self) -> Result<u64> {
        let policy = RetryPolicy::with_max_retries(self.settings.max_retries);
        let mut listed: HashSet<String> = HashSet::new();
        let mut page: Option<String> = None;

        loop {
            if self.cancel.is_cancelled() {
                // An unfinished enumeration proves nothing about absence.
                return Err(SyncError::Cancelled);
            }

            let page_ref = page.as_deref();
            let batch = retry::with_retry(&policy, &self.cancel, "list remote ids", || {
                self.source.list_ids(page_ref)
            })
            .await?;

            listed.extend(batch.ids);
            match batch.next_page {
                Some(next) => page = Some(next),
                None => break,
            }
        }

        self.mark_absent(&listed).await
    }

    async fn run_pass(&self, mode: SyncMode, checkpoint: &SyncCheckpoint) -> Result<SyncReport> {
        let started = Instant::now();
        let mode_name = match mode {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        };
        info!(
            mode = mode_name,
            workers = self.settings.workers,
            "sync pass starting"
        );

        let policy = RetryPolicy::with_max_retries(self.settings.max_retries);
        let counters = Arc::new(RunCounters::new());
        let (tx, rx) = mpsc::channel::<String>(self.settings.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(self.settings.workers.max(1));
        for worker_id in 0..self.settings.workers.max(1) {
            workers.push(tokio::spawn(worker::run(
                worker_id,
                self.source.clone(),
                self.store.clone(),
                policy,
                counters.clone(),
                self.cancel.clone(),
                rx.clone(),
            )));
        }

        let since = match mode {
            SyncMode::Full => None,
            SyncMode::Incremental => checkpoint.cursor.clone(),
        };

        // Listing is pipelined with fetching: each page is enqueued as soon
        // as it arrives, and the bounded queue provides backpressure.
        let mut page: Option<String> = None;
        let mut next_cursor: Option<String> = None;
        let mut listed: HashSet<String> = HashSet::new();
        let mut listing_complete = false;
        let mut listing_error: Option<SyncError> = None;

        'listing: loop {
            if self.cancel.is_cancelled() {
                info!("cancellation requested, no further identifiers will be enqueued");
                break;
            }

            let since_ref = since.as_deref();
            let page_ref = page.as_deref();
            let batch = match retry::with_retry(&policy, &self.cancel, "list changes", || {
                self.source.list_changed(since_ref, page_ref)
            })
            .await
            {
                Ok(batch) => batch,
                Err(err) => {
                    listing_error = Some(err);
                    break;
                }
            };

            if let Some(cursor) = batch.cursor {
                next_cursor = Some(cursor);
            }

            for id in batch.ids {
                if mode == SyncMode::Full {
                    listed.insert(id.clone());
                }

                let enqueued = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => false,
                    sent = tx.send(id) => sent.is_ok(),
                };
                if !enqueued {
                    break 'listing;
                }
            }

            match batch.next_page {
                Some(next) => page = Some(next),
                None => {
                    listing_complete = true;
                    break;
                }
            }
        }

        // Barrier: every queued identifier drains, successfully or not,
        // before anything below looks at the results.
        drop(tx);
        for handle in workers {
            let _ = handle.await;
        }

        if let Some(err) = listing_error {
            if matches!(err, SyncError::CursorExpired) {
                return Err(err);
            }
            error!(error = %err, "listing failed, abandoning run without cursor advance");
            self.commit_failed(checkpoint).await?;
            return Err(SyncError::Aborted(format!("listing failed: {}", err)));
        }

        let cancelled = self.cancel.is_cancelled();
        let attempted = counters.attempted();
        let failed = counters.failed();

        if attempted >= MIN_ATTEMPTS_FOR_ABORT {
            let failure_rate = failed as f64 / attempted as f64;
            if failure_rate > self.settings.failure_abort_threshold {
                error!(
                    failed,
                    attempted,
                    "failure rate above threshold, abandoning run without cursor advance"
                );
                self.commit_failed(checkpoint).await?;
                return Err(SyncError::Aborted(format!(
                    "{} of {} fetches failed",
                    failed, attempted
                )));
            }
        }

        // Deletion reconciliation needs a complete listing: absence from a
        // partial or incremental enumeration is not evidence of deletion.
        let deleted_detected = if mode == SyncMode::Full && listing_complete && !cancelled {
            self.mark_absent(&listed).await?
        } else {
            0
        };

        let status = if cancelled || failed > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Clean
        };

        let mut committed = checkpoint.clone();
        committed.last_run_status = status;
        if listing_complete && !cancelled {
            // The cursor only moves once every listed identifier has been
            // drained; a cancelled run keeps the old cursor so nothing that
            // was listed but never fetched can fall into a gap.
            if let Some(cursor) = next_cursor {
                committed.cursor = Some(cursor);
            }
            if mode == SyncMode::Full {
                committed.last_full_sync_at = Some(Utc::now());
            }
        }
        self.store.set_checkpoint(&committed).await?;

        let report = SyncReport {
            mode,
            status,
            fetched: counters.fetched(),
            inserted: counters.inserted(),
            updated: counters.updated(),
            unchanged: counters.unchanged(),
            failed,
            deleted_detected,
            errors: counters.take_errors(),
            elapsed: started.elapsed(),
        };

        info!(
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failed,
            deleted = report.deleted_detected,
            status = status.as_str(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "sync pass finished"
        );

        Ok(report)
    }

    /// Flag stored, non-deleted identifiers that are absent from `listed`.
    async fn mark_absent(&self, listed: &HashSet<String>) -> Result<u64> {
        let known = self.store.known_ids(false).await?;
        let missing: Vec<String> = known
            .into_iter()
            .filter(|id| !listed.contains(id))
            .collect();

        if missing.is_empty() {
            return Ok(0);
        }

        info!(
            count = missing.len(),
            "flagging messages absent from the remote listing as deleted"
        );
        self.store.mark_deleted(&missing).await
    }

    /// Record that the run failed without advancing the cursor, so the next
    /// pass re-covers the same range.
    async fn commit_failed(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        let mut failed = checkpoint.clone();
        failed.last_run_status = RunStatus::Failed;
        self.store.set_checkpoint(&failed).await
    }
}
