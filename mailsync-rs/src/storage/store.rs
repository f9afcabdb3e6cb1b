use crate::error::{Result, StorageErrorKind, SyncError};
use crate::message::MessageRecord;
use crate::storage::{RunStatus, StoredMessage, SyncCheckpoint, UpsertResult};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// File name of the per-account store inside its data directory.
pub const STORE_FILE_NAME: &str = "messages.db";

const POOL_SIZE: u32 = 8;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Batch size for `IN (...)` updates, well under SQLite's bind limit.
const DELETE_CHUNK: usize = 500;

/// Handle to one account's SQLite store. Cheap to clone; all clones share
/// the connection pool. SQLite serializes writers, so concurrent upserts of
/// the same key resolve to one of them in full (single-record atomicity).
#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    /// Open (creating if needed) the store under `data_dir` and ensure the
    /// schema exists.
    pub async fn open(data_dir: &Path) -> Result<MessageStore> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(STORE_FILE_NAME);

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(POOL_SIZE)
            .connect_with(options)
            .await?;

        let store = MessageStore { pool };
        store.create_schema().await?;

        info!(path = %path.display(), "message store ready");
        Ok(store)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                message_id      TEXT PRIMARY KEY,
                thread_id       TEXT NOT NULL,
                sender          TEXT,
                recipients      TEXT NOT NULL,
                labels          TEXT NOT NULL,
                subject         TEXT,
                body            TEXT,
                size_bytes      INTEGER NOT NULL CHECK (size_bytes >= 0),
                internal_date   TEXT NOT NULL,
                is_read         INTEGER NOT NULL,
                is_outgoing     INTEGER NOT NULL,
                is_deleted      INTEGER NOT NULL DEFAULT 0,
                last_indexed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages (thread_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_internal_date ON messages (internal_date)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_state (
                id                INTEGER PRIMARY KEY CHECK (id = 1),
                cursor            TEXT,
                last_full_sync_at TEXT,
                last_run_status   TEXT NOT NULL DEFAULT 'clean'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert-or-replace by primary key. A record present in a remote
    /// listing is by definition not deleted, so the write also clears the
    /// deletion flag. Content-identical writes only refresh the index
    /// timestamp, so repeated syncs of an unchanged mailbox count no
    /// updates.
    pub async fn upsert(&self, record: &MessageRecord) -> Result<UpsertResult> {
        let sender = record
            .sender
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let recipients = serde_json::to_string(&record.recipients)?;
        let labels = serde_json::to_string(&record.labels)?;
        let now = Utc::now().to_rfc3339();

        // Advisory probe for the result classification; the write itself is
        // a single atomic statement either way.
        let existing = self.get(&record.message_id).await?;
        if let Some(stored) = &existing {
            if !stored.is_deleted && stored.record == *record {
                sqlx::query("UPDATE messages SET last_indexed_at = ? WHERE message_id = ?")
                    .bind(&now)
                    .bind(&record.message_id)
                    .execute(&self.pool)
                    .await?;
                return Ok(UpsertResult::Unchanged);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO messages (
                message_id, thread_id, sender, recipients, labels,
                subject, body, size_bytes, internal_date,
                is_read, is_outgoing, is_deleted, last_indexed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT(message_id) DO UPDATE SET
                thread_id       = excluded.thread_id,
                sender          = excluded.sender,
                recipients      = excluded.recipients,
                labels          = excluded.labels,
                subject         = excluded.subject,
                body            = excluded.body,
                size_bytes      = excluded.size_bytes,
                internal_date   = excluded.internal_date,
                is_read         = excluded.is_read,
                is_outgoing     = excluded.is_outgoing,
                is_deleted      = 0,
                last_indexed_at = excluded.last_indexed_at
            "#,
        )
        .bind(&record.message_id)
        .bind(&record.thread_id)
        .bind(&sender)
        .bind(&recipients)
        .bind(&labels)
        .bind(&record.subject)
        .bind(&record.body)
        .bind(record.size_bytes)
        .bind(record.internal_date.to_rfc3339())
        .bind(record.is_read)
        .bind(record.is_outgoing)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(if existing.is_some() {
            UpsertResult::Updated
        } else {
            UpsertResult::Inserted
        })
    }

    /// Flag the given identifiers as deleted. Already-flagged rows are left
    /// untouched, which makes the call idempotent; returns how many rows
    /// actually flipped.
    pub async fn mark_deleted(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().to_rfc3339();
        let mut flipped = 0;

        for chunk in ids.chunks(DELETE_CHUNK) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "UPDATE messages SET is_deleted = 1, last_indexed_at = ? \
                 WHERE is_deleted = 0 AND message_id IN ({})",
                placeholders
            );

            let mut query = sqlx::query(&sql).bind(&now);
            for id in chunk {
                query = query.bind(id);
            }

            flipped += query.execute(&self.pool).await?.rows_affected();
        }

        Ok(flipped)
    }

    /// Identifier-only projection for the deletion reconciler.
    pub async fn known_ids(&self, include_deleted: bool) -> Result<Vec<String>> {
        let sql = if include_deleted {
            "SELECT message_id FROM messages"
        } else {
            "SELECT message_id FROM messages WHERE is_deleted = 0"
        };

        Ok(sqlx::query_scalar(sql).fetch_all(&self.pool).await?)
    }

    /// Read the checkpoint row, defaulting to "never synced" when absent.
    pub async fn checkpoint(&self) -> Result<SyncCheckpoint> {
        let row: Option<(Option<String>, Option<String>, String)> = sqlx::query_as(
            "SELECT cursor, last_full_sync_at, last_run_status FROM sync_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(SyncCheckpoint::default()),
            Some((cursor, last_full, status)) => Ok(SyncCheckpoint {
                cursor,
                last_full_sync_at: last_full.as_deref().map(parse_timestamp).transpose()?,
                last_run_status: RunStatus::parse(&status).ok_or_else(|| {
                    SyncError::storage(
                        StorageErrorKind::Corrupt,
                        format!("unknown run status '{}'", status),
                    )
                })?,
            }),
        }
    }

    /// Replace the checkpoint row in one statement, so concurrent readers
    /// observe either the old or the new value, never a torn one.
    pub async fn set_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (id, cursor, last_full_sync_at, last_run_status)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                cursor            = excluded.cursor,
                last_full_sync_at = excluded.last_full_sync_at,
                last_run_status   = excluded.last_run_status
            "#,
        )
        .bind(&checkpoint.cursor)
        .bind(checkpoint.last_full_sync_at.map(|t| t.to_rfc3339()))
        .bind(checkpoint.last_run_status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load one full row. The engine itself only writes; this is the read
    /// surface for the downstream query layer and the tests.
    pub async fn get(&self, message_id: &str) -> Result<Option<StoredMessage>> {
        let row = sqlx::query(
            r#"
            SELECT message_id, thread_id, sender, recipients, labels,
                   subject, body, size_bytes, internal_date,
                   is_read, is_outgoing, is_deleted, last_indexed_at
            FROM messages WHERE message_id = ?
            "#,
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_message).transpose()
    }
}

fn row_to_message(row: SqliteRow) -> Result<StoredMessage> {
    let sender: Option<String> = row.try_get("sender")?;
    let recipients: String = row.try_get("recipients")?;
    let labels: String = row.try_get("labels")?;
    let internal_date: String = row.try_get("internal_date")?;
    let last_indexed_at: String = row.try_get("last_indexed_at")?;

    Ok(StoredMessage {
        record: MessageRecord {
            message_id: row.try_get("message_id")?,
            thread_id: row.try_get("thread_id")?,
            sender: sender.as_deref().map(serde_json::from_str).transpose()?,
            recipients: serde_json::from_str(&recipients)?,
            labels: serde_json::from_str(&labels)?,
            subject: row.try_get("subject")?,
            body: row.try_get("body")?,
            size_bytes: row.try_get("size_bytes")?,
            internal_date: parse_timestamp(&internal_date)?,
            is_read: row.try_get("is_read")?,
            is_outgoing: row.try_get("is_outgoing")?,
        },
        is_deleted: row.try_get("is_deleted")?,
        last_indexed_at: parse_timestamp(&last_indexed_at)?,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            SyncError::storage(
                StorageErrorKind::Corrupt,
                format!("bad timestamp '{}': {}", raw, e),
            )
        })
}
