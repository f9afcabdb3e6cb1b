//! Durable storage: one SQLite file per account, holding the `messages`
//! table and the single-row sync checkpoint.

mod store;

pub use store::MessageStore;

use crate::message::MessageRecord;
use chrono::{DateTime, Utc};

/// Outcome of an idempotent write-by-key. `Unchanged` means the incoming
/// record matched the stored content byte for byte; only its index
/// timestamp was refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    Inserted,
    Updated,
    Unchanged,
}

/// How the previous run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Clean,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Clean => "clean",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Option<RunStatus> {
        match raw {
            "clean" => Some(RunStatus::Clean),
            "partial" => Some(RunStatus::Partial),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Singleton sync position for one account store. Advanced only after the
/// corresponding records are durably persisted, never before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCheckpoint {
    /// Opaque remote cursor; `None` forces the next run into full mode.
    pub cursor: Option<String>,
    pub last_full_sync_at: Option<DateTime<Utc>>,
    pub last_run_status: RunStatus,
}

impl Default for SyncCheckpoint {
    fn default() -> Self {
        SyncCheckpoint {
            cursor: None,
            last_full_sync_at: None,
            last_run_status: RunStatus::Clean,
        }
    }
}

/// A message row read back from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub record: MessageRecord,
    pub is_deleted: bool,
    pub last_indexed_at: DateTime<Utc>,
}
