use thiserror::Error;

/// Storage failure categories. `ConstraintViolation` indicates a transform
/// bug for that one record; `LockTimeout` is retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    Corrupt,
    LockTimeout,
    ConstraintViolation,
    Other,
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("transient fetch error: {0}")]
    TransientFetch(String),

    #[error("permanent fetch error: {0}")]
    PermanentFetch(String),

    #[error("message not found: {0}")]
    NotFound(String),

    #[error("sync cursor expired or rejected by the remote")]
    CursorExpired,

    #[error("storage error ({kind:?}): {message}")]
    Storage {
        kind: StorageErrorKind,
        message: String,
    },

    #[error("credential error: {0}")]
    Credential(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("sync cancelled")]
    Cancelled,

    #[error("sync aborted: {0}")]
    Aborted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Errors worth retrying with backoff. Everything else either fails the
    /// item immediately or aborts the run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::TransientFetch(_)
                | SyncError::Storage {
                    kind: StorageErrorKind::LockTimeout,
                    ..
                }
        )
    }

    pub fn storage(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        SyncError::Storage {
            kind,
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::Database(db) => {
                if db.is_unique_violation() || db.is_check_violation() {
                    StorageErrorKind::ConstraintViolation
                } else if is_busy(db.code().as_deref()) {
                    StorageErrorKind::LockTimeout
                } else {
                    StorageErrorKind::Other
                }
            }
            sqlx::Error::PoolTimedOut => StorageErrorKind::LockTimeout,
            sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => StorageErrorKind::Corrupt,
            _ => StorageErrorKind::Other,
        };
        SyncError::Storage {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        // Malformed response bodies are not going to improve on retry.
        if err.is_decode() {
            SyncError::PermanentFetch(err.to_string())
        } else {
            SyncError::TransientFetch(err.to_string())
        }
    }
}

// SQLITE_BUSY (5) and SQLITE_LOCKED (6).
fn is_busy(code: Option<&str>) -> bool {
    matches!(code, Some("5") | Some("6"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(SyncError::TransientFetch("rate limited".into()).is_transient());
        assert!(SyncError::storage(StorageErrorKind::LockTimeout, "busy").is_transient());
        assert!(!SyncError::PermanentFetch("bad payload".into()).is_transient());
        assert!(!SyncError::NotFound("abc".into()).is_transient());
        assert!(!SyncError::storage(StorageErrorKind::ConstraintViolation, "pk").is_transient());
    }
}
