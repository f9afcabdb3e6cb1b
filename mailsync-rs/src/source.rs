//! Abstraction over the remote message store.
//!
//! The sync engine only ever talks to this trait; the production
//! implementation is [`crate::gmail::GmailClient`], and the integration tests
//! drive the engine with an in-memory fake.

use crate::error::Result;
use crate::gmail::model;
use async_trait::async_trait;

/// One page of a change listing.
#[derive(Debug, Clone, Default)]
pub struct ChangePage {
    pub ids: Vec<String>,
    /// Token for the next page, `None` when the listing is exhausted.
    pub next_page: Option<String>,
    /// Cursor to commit once this pass's records are durably stored.
    pub cursor: Option<String>,
}

/// One page of a bare identifier enumeration.
#[derive(Debug, Clone, Default)]
pub struct IdPage {
    pub ids: Vec<String>,
    pub next_page: Option<String>,
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    /// List identifiers changed since `cursor`, or everything when `None`.
    /// A stale cursor fails with [`crate::error::SyncError::CursorExpired`].
    async fn list_changed(&self, since: Option<&str>, page: Option<&str>) -> Result<ChangePage>;

    /// Enumerate all current identifiers. Used only for deletion
    /// reconciliation.
    async fn list_ids(&self, page: Option<&str>) -> Result<IdPage>;

    /// Fetch the full payload for one identifier.
    async fn fetch(&self, id: &str) -> Result<model::Message>;
}
