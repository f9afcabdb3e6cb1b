//! Domain types for locally stored messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single mailbox participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: Option<String>,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipients {
    #[serde(default)]
    pub to: Vec<Address>,
    #[serde(default)]
    pub cc: Vec<Address>,
    #[serde(default)]
    pub bcc: Vec<Address>,
}

/// One remote message in storage shape. `message_id` is immutable once
/// written; every other field is replaced wholesale on upsert (no field-level
/// merging, so concurrent writers of the same id converge on one of them).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    pub thread_id: String,
    pub sender: Option<Address>,
    pub recipients: Recipients,
    pub labels: Vec<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub size_bytes: i64,
    /// Remote-authoritative send/receive time.
    pub internal_date: DateTime<Utc>,
    pub is_read: bool,
    pub is_outgoing: bool,
}

impl Address {
    /// Parse an RFC 5322-style mailbox like `Jane Doe <jane@example.com>`
    /// or a bare `jane@example.com`.
    pub fn parse(raw: &str) -> Option<Address> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if let Some(open) = raw.rfind('<') {
            let close = raw[open..].find('>').map(|i| open + i)?;
            let email = raw[open + 1..close].trim();
            if email.is_empty() {
                return None;
            }
            let name = raw[..open].trim().trim_matches('"').trim();
            Some(Address {
                name: (!name.is_empty()).then(|| name.to_string()),
                email: email.to_string(),
            })
        } else {
            Some(Address {
                name: None,
                email: raw.to_string(),
            })
        }
    }

    /// Parse a comma-separated address-list header value.
    pub fn parse_list(raw: &str) -> Vec<Address> {
        split_addresses(raw)
            .iter()
            .filter_map(|part| Address::parse(part))
            .collect()
    }
}

// Split on commas that are not inside a quoted display name.
fn split_addresses(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in raw.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                if !current.trim().is_empty() {
                    parts.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }

    parts
}
