//! REST client for the Gmail API.

use crate::auth::Credentials;
use crate::error::{Result, SyncError};
use crate::gmail::model;
use crate::source::{ChangePage, IdPage, MessageSource};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

const BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Identifiers per listing page, the API maximum.
const PAGE_SIZE: &str = "500";

pub struct GmailClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

impl GmailClient {
    pub fn new(credentials: &Credentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(GmailClient {
            http,
            token: credentials.access_token.clone(),
            base_url: BASE_URL.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(%url, "remote request");

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        Err(classify_status(status, path))
    }

    async fn profile(&self) -> Result<model::Profile> {
        self.get_json("profile", &[]).await
    }

    async fn message_page(&self, page: Option<&str>) -> Result<model::MessageListResponse> {
        let mut query: Vec<(&str, &str)> = vec![
            ("maxResults", PAGE_SIZE),
            ("includeSpamTrash", "true"),
        ];
        if let Some(token) = page {
            query.push(("pageToken", token));
        }
        self.get_json("messages", &query).await
    }
}

#[async_trait]
impl MessageSource for GmailClient {
    async fn list_changed(&self, since: Option<&str>, page: Option<&str>) -> Result<ChangePage> {
        match since {
            // Full listing over the messages collection. The cursor for the
            // whole pass is the mailbox's history id captured before any page
            // is read, so changes racing the listing fall into the next
            // incremental window instead of being skipped.
            None => {
                let cursor = if page.is_none() {
                    Some(self.profile().await?.history_id)
                } else {
                    None
                };

                let listing = self.message_page(page).await?;
                Ok(ChangePage {
                    ids: listing.messages.into_iter().map(|m| m.id).collect(),
                    next_page: listing.next_page_token,
                    cursor,
                })
            }
            // Incremental delta over the history collection.
            Some(cursor) => {
                let mut query: Vec<(&str, &str)> =
                    vec![("startHistoryId", cursor), ("maxResults", PAGE_SIZE)];
                if let Some(token) = page {
                    query.push(("pageToken", token));
                }

                let listing: model::HistoryListResponse =
                    self.get_json("history", &query).await.map_err(|e| {
                        // The remote answers 404 when the start id has aged
                        // out of its history window.
                        match e {
                            SyncError::NotFound(_) => SyncError::CursorExpired,
                            other => other,
                        }
                    })?;

                Ok(ChangePage {
                    ids: changed_ids(&listing.history),
                    next_page: listing.next_page_token,
                    cursor: listing.history_id,
                })
            }
        }
    }

    async fn list_ids(&self, page: Option<&str>) -> Result<IdPage> {
        let listing = self.message_page(page).await?;
        Ok(IdPage {
            ids: listing.messages.into_iter().map(|m| m.id).collect(),
            next_page: listing.next_page_token,
        })
    }

    async fn fetch(&self, id: &str) -> Result<model::Message> {
        let path = format!("messages/{}", id);
        self.get_json(&path, &[("format", "full")]).await
    }
}

/// Collect the identifiers an incremental delta makes fetch-worthy: added
/// messages and label changes, minus anything the delta itself reports as
/// deleted (those would only 404; reconciliation owns deletion flagging).
fn changed_ids(history: &[model::HistoryRecord]) -> Vec<String> {
    let deleted: HashSet<&str> = history
        .iter()
        .flat_map(|r| r.messages_deleted.iter())
        .map(|m| m.message.id.as_str())
        .collect();

    let mut seen = HashSet::new();
    let mut ids = Vec::new();

    let candidates = history.iter().flat_map(|record| {
        record
            .messages
            .iter()
            .map(|m| m.id.as_str())
            .chain(record.messages_added.iter().map(|m| m.message.id.as_str()))
            .chain(record.labels_added.iter().map(|m| m.message.id.as_str()))
            .chain(record.labels_removed.iter().map(|m| m.message.id.as_str()))
    });

    for id in candidates {
        if !deleted.contains(id) && seen.insert(id.to_string()) {
            ids.push(id.to_string());
        }
    }

    ids
}

fn classify_status(status: StatusCode, path: &str) -> SyncError {
    match status {
        StatusCode::NOT_FOUND => SyncError::NotFound(path.to_string()),
        // 429 is the documented rate-limit answer; 403 is how per-user quota
        // exhaustion actually arrives.
        StatusCode::TOO_MANY_REQUESTS | StatusCode::FORBIDDEN => {
            SyncError::TransientFetch(format!("HTTP {} from {}", status, path))
        }
        s if s.is_server_error() => {
            SyncError::TransientFetch(format!("HTTP {} from {}", status, path))
        }
        s => SyncError::PermanentFetch(format!("HTTP {} from {}", s, path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::model::{HistoryMessage, HistoryRecord, MessageRef};

    fn href(id: &str) -> HistoryMessage {
        HistoryMessage {
            message: MessageRef {
                id: id.to_string(),
                thread_id: None,
            },
        }
    }

    fn record() -> HistoryRecord {
        HistoryRecord {
            messages: vec![],
            messages_added: vec![],
            messages_deleted: vec![],
            labels_added: vec![],
            labels_removed: vec![],
        }
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "messages"),
            SyncError::TransientFetch(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "messages"),
            SyncError::TransientFetch(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "messages/x"),
            SyncError::NotFound(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "messages"),
            SyncError::PermanentFetch(_)
        ));
    }

    #[test]
    fn delta_ids_are_deduplicated_and_exclude_deletions() {
        let mut first = record();
        first.messages_added = vec![href("a"), href("b")];
        first.labels_added = vec![href("a")];

        let mut second = record();
        second.labels_removed = vec![href("b"), href("c")];
        second.messages_deleted = vec![href("d")];
        second.messages = vec![
            MessageRef {
                id: "d".to_string(),
                thread_id: None,
            },
            MessageRef {
                id: "e".to_string(),
                thread_id: None,
            },
        ];

        let ids = changed_ids(&[first, second]);
        assert_eq!(ids, vec!["a", "b", "e", "c"]);
    }
}
