//! In-memory remote source for driving the engine in tests: scriptable
//! transient failures, cursor expiry, and a change log with the same
//! shape the real listing presents.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use mailsync_rs::error::{Result, SyncError};
use mailsync_rs::gmail::model::{Header, Message, MessagePart, PartBody};
use mailsync_rs::source::{ChangePage, IdPage, MessageSource};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Small pages so even tiny mailboxes exercise the paging path.
const PAGE_SIZE: usize = 2;

#[derive(Default)]
struct State {
    /// Current remote mailbox, keyed by id.
    messages: BTreeMap<String, Message>,
    /// Change log: (sequence, id), newest last. The sequence doubles as the
    /// cursor value.
    changes: Vec<(u64, String)>,
    seq: u64,
    /// Remaining scripted transient failures per id.
    fetch_failures: HashMap<String, u32>,
    /// When set, every incremental listing rejects its cursor.
    cursors_expired: bool,
    fetch_calls: HashMap<String, u32>,
}

#[derive(Default)]
pub struct FakeSource {
    state: Mutex<State>,
}

impl FakeSource {
    pub fn new() -> Self {
        FakeSource::default()
    }

    /// Create or replace a message, recording it in the change log.
    pub fn put_message(&self, id: &str, subject: &str) {
        self.put_message_with_labels(id, subject, &["INBOX", "UNREAD"]);
    }

    pub fn put_message_with_labels(&self, id: &str, subject: &str, labels: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.seq += 1;
        let seq = state.seq;
        state
            .messages
            .insert(id.to_string(), make_message(id, subject, labels));
        state.changes.push((seq, id.to_string()));
    }

    /// Delete a message remote-side. Deletions are not offered for fetch by
    /// incremental listings; only a fresh full enumeration reveals them.
    pub fn remove_message(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.messages.remove(id);
        state.seq += 1;
    }

    /// Script the next `times` fetches of `id` to fail transiently.
    pub fn fail_fetches(&self, id: &str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .fetch_failures
            .insert(id.to_string(), times);
    }

    /// Make every incremental listing reject its start cursor.
    pub fn expire_cursors(&self) {
        self.state.lock().unwrap().cursors_expired = true;
    }

    pub fn fetch_count(&self, id: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .fetch_calls
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn current_cursor(&self) -> String {
        self.state.lock().unwrap().seq.to_string()
    }

    fn page_of(ids: &[String], page: Option<&str>) -> (Vec<String>, Option<String>) {
        let offset: usize = page.and_then(|p| p.parse().ok()).unwrap_or(0);
        let end = (offset + PAGE_SIZE).min(ids.len());
        let next = (end < ids.len()).then(|| end.to_string());
        (ids[offset..end].to_vec(), next)
    }
}

#[async_trait]
impl MessageSource for FakeSource {
    async fn list_changed(&self, since: Option<&str>, page: Option<&str>) -> Result<ChangePage> {
        let state = self.state.lock().unwrap();

        match since {
            None => {
                let all: Vec<String> = state.messages.keys().cloned().collect();
                let (ids, next_page) = Self::page_of(&all, page);
                Ok(ChangePage {
                    ids,
                    next_page,
                    cursor: page.is_none().then(|| state.seq.to_string()),
                })
            }
            Some(cursor) => {
                if state.cursors_expired {
                    return Err(SyncError::CursorExpired);
                }
                let since_seq: u64 = cursor
                    .parse()
                    .map_err(|_| SyncError::PermanentFetch(format!("bad cursor '{}'", cursor)))?;

                let mut seen = std::collections::HashSet::new();
                let ids: Vec<String> = state
                    .changes
                    .iter()
                    .filter(|(seq, _)| *seq > since_seq)
                    .map(|(_, id)| id.clone())
                    .filter(|id| state.messages.contains_key(id))
                    .filter(|id| seen.insert(id.clone()))
                    .collect();

                Ok(ChangePage {
                    ids,
                    next_page: None,
                    cursor: Some(state.seq.to_string()),
                })
            }
        }
    }

    async fn list_ids(&self, page: Option<&str>) -> Result<IdPage> {
        let state = self.state.lock().unwrap();
        let all: Vec<String> = state.messages.keys().cloned().collect();
        let (ids, next_page) = Self::page_of(&all, page);
        Ok(IdPage { ids, next_page })
    }

    async fn fetch(&self, id: &str) -> Result<Message> {
        let mut state = self.state.lock().unwrap();
        *state.fetch_calls.entry(id.to_string()).or_insert(0) += 1;

        if let Some(remaining) = state.fetch_failures.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SyncError::TransientFetch(format!(
                    "scripted failure for {}",
                    id
                )));
            }
        }

        state
            .messages
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(id.to_string()))
    }
}

fn make_message(id: &str, subject: &str, labels: &[&str]) -> Message {
    let body = format!("body of {}", id);
    Message {
        id: id.to_string(),
        thread_id: Some(format!("thread-{}", id)),
        label_ids: labels.iter().map(|l| l.to_string()).collect(),
        internal_date: Some("1700000000000".to_string()),
        size_estimate: Some(body.len() as i64),
        payload: Some(MessagePart {
            mime_type: Some("text/plain".to_string()),
            headers: vec![
                Header {
                    name: "From".to_string(),
                    value: "Jane Doe <jane@example.com>".to_string(),
                },
                Header {
                    name: "To".to_string(),
                    value: "bob@example.com".to_string(),
                },
                Header {
                    name: "Subject".to_string(),
                    value: subject.to_string(),
                },
            ],
            body: Some(PartBody {
                data: Some(URL_SAFE_NO_PAD.encode(&body)),
                size: Some(body.len() as i64),
            }),
            parts: vec![],
        }),
    }
}
