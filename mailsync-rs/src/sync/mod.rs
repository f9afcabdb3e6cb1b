//! The synchronization engine: orchestrator, fetch worker pool, and retry
//! policy.
//!
//! One run moves through `Planning → Fetching → Reconciling → Committing`;
//! listing and fetching are pipelined through a bounded queue, and the
//! checkpoint is only ever written after every queued identifier has been
//! drained.

mod engine;
mod retry;
mod worker;

pub use engine::SyncEngine;
pub use retry::RetryPolicy;

use crate::storage::{RunStatus, UpsertResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Per-item errors kept for the run summary; the rest only reach the log.
const MAX_REPORTED_ERRORS: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Incremental,
}

/// One failed identifier and why.
#[derive(Debug, Clone)]
pub struct ItemError {
    pub message_id: String,
    pub cause: String,
}

/// Outcome summary of one engine invocation.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub status: RunStatus,
    pub fetched: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub failed: u64,
    pub deleted_detected: u64,
    pub errors: Vec<ItemError>,
    pub elapsed: Duration,
}

/// Shared run counters, updated lock-free by the workers; the error list is
/// bounded so a pathological run cannot balloon the report.
#[derive(Debug, Default)]
pub(crate) struct RunCounters {
    fetched: AtomicU64,
    inserted: AtomicU64,
    updated: AtomicU64,
    unchanged: AtomicU64,
    failed: AtomicU64,
    errors: Mutex<Vec<ItemError>>,
}

impl RunCounters {
    pub(crate) fn new() -> Self {
        RunCounters::default()
    }

    pub(crate) fn record_fetched(&self) {
        self.fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stored(&self, result: UpsertResult) {
        match result {
            UpsertResult::Inserted => self.inserted.fetch_add(1, Ordering::Relaxed),
            UpsertResult::Updated => self.updated.fetch_add(1, Ordering::Relaxed),
            UpsertResult::Unchanged => self.unchanged.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub(crate) fn record_failed(&self, message_id: &str, cause: String) {
        self.failed.fetch_add(1, Ordering::Relaxed);

        let mut errors = self.errors.lock().expect("error list poisoned");
        if errors.len() < MAX_REPORTED_ERRORS {
            errors.push(ItemError {
                message_id: message_id.to_string(),
                cause,
            });
        }
    }

    pub(crate) fn fetched(&self) -> u64 {
        self.fetched.load(Ordering::Relaxed)
    }

    pub(crate) fn inserted(&self) -> u64 {
        self.inserted.load(Ordering::Relaxed)
    }

    pub(crate) fn updated(&self) -> u64 {
        self.updated.load(Ordering::Relaxed)
    }

    pub(crate) fn unchanged(&self) -> u64 {
        self.unchanged.load(Ordering::Relaxed)
    }

    pub(crate) fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Items that reached a final outcome, success or failure.
    pub(crate) fn attempted(&self) -> u64 {
        self.inserted() + self.updated() + self.unchanged() + self.failed()
    }

    pub(crate) fn take_errors(&self) -> Vec<ItemError> {
        std::mem::take(&mut *self.errors.lock().expect("error list poisoned"))
    }
}
