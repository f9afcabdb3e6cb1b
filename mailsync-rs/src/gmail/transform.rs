//! Transformation from the remote wire format into the storage record shape.
//!
//! The transform is order-independent and replaces the whole record: fetching
//! the same identifier twice in one run converges on whichever fetch wrote
//! last, with no field-level merging.

use crate::error::{Result, SyncError};
use crate::gmail::model;
use crate::message::{Address, MessageRecord, Recipients};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};

/// Label the remote applies to unread messages.
const LABEL_UNREAD: &str = "UNREAD";

/// Label the remote applies to messages sent from this mailbox.
const LABEL_SENT: &str = "SENT";

/// Build a [`MessageRecord`] from a fetched payload. Fails with a permanent
/// error when the payload is structurally unusable; a later fetch of the same
/// bytes would fail the same way.
pub fn record_from_message(msg: &model::Message) -> Result<MessageRecord> {
    if msg.id.is_empty() {
        return Err(SyncError::PermanentFetch(
            "message payload missing id".to_string(),
        ));
    }

    let payload = msg.payload.as_ref();

    let sender = payload
        .and_then(|p| p.header("From"))
        .and_then(Address::parse);

    let recipients = Recipients {
        to: payload
            .and_then(|p| p.header("To"))
            .map(Address::parse_list)
            .unwrap_or_default(),
        cc: payload
            .and_then(|p| p.header("Cc"))
            .map(Address::parse_list)
            .unwrap_or_default(),
        bcc: payload
            .and_then(|p| p.header("Bcc"))
            .map(Address::parse_list)
            .unwrap_or_default(),
    };

    let subject = payload
        .and_then(|p| p.header("Subject"))
        .map(|s| s.to_string());

    let body = payload.and_then(extract_body);

    let internal_date = parse_internal_date(msg)?;

    Ok(MessageRecord {
        message_id: msg.id.clone(),
        thread_id: msg.thread_id.clone().unwrap_or_else(|| msg.id.clone()),
        sender,
        recipients,
        labels: msg.label_ids.clone(),
        subject,
        body,
        size_bytes: msg.size_estimate.unwrap_or(0).max(0),
        internal_date,
        is_read: !msg.label_ids.iter().any(|l| l == LABEL_UNREAD),
        is_outgoing: msg.label_ids.iter().any(|l| l == LABEL_SENT),
    })
}

fn parse_internal_date(msg: &model::Message) -> Result<DateTime<Utc>> {
    let raw = msg.internal_date.as_deref().ok_or_else(|| {
        SyncError::PermanentFetch(format!("message {} has no internal date", msg.id))
    })?;

    let millis: i64 = raw.parse().map_err(|_| {
        SyncError::PermanentFetch(format!("message {} has bad internal date '{}'", msg.id, raw))
    })?;

    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        SyncError::PermanentFetch(format!(
            "message {} internal date {} out of range",
            msg.id, millis
        ))
    })
}

/// Pick the best displayable body: first text/plain leaf, falling back to
/// text/html, depth-first through the part tree.
fn extract_body(payload: &model::MessagePart) -> Option<String> {
    find_part(payload, "text/plain")
        .or_else(|| find_part(payload, "text/html"))
        .and_then(decode_part)
}

fn find_part<'a>(part: &'a model::MessagePart, mime: &str) -> Option<&'a model::MessagePart> {
    if part.mime_type.as_deref() == Some(mime)
        && part.body.as_ref().and_then(|b| b.data.as_ref()).is_some()
    {
        return Some(part);
    }
    part.parts.iter().find_map(|child| find_part(child, mime))
}

fn decode_part(part: &model::MessagePart) -> Option<String> {
    let data = part.body.as_ref()?.data.as_deref()?;
    // The API emits unpadded base64url; tolerate padded variants.
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::model::{Header, Message, MessagePart, PartBody};

    fn header(name: &str, value: &str) -> Header {
        Header {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    fn text_part(mime: &str, text: &str) -> MessagePart {
        MessagePart {
            mime_type: Some(mime.to_string()),
            headers: vec![],
            body: Some(PartBody {
                data: Some(URL_SAFE_NO_PAD.encode(text)),
                size: Some(text.len() as i64),
            }),
            parts: vec![],
        }
    }

    fn sample_message() -> Message {
        Message {
            id: "m1".to_string(),
            thread_id: Some("t1".to_string()),
            label_ids: vec!["INBOX".to_string(), "UNREAD".to_string()],
            internal_date: Some("1700000000000".to_string()),
            size_estimate: Some(2048),
            payload: Some(MessagePart {
                mime_type: Some("multipart/alternative".to_string()),
                headers: vec![
                    header("From", "Jane Doe <jane@example.com>"),
                    header("To", "bob@example.com, Carol <carol@example.com>"),
                    header("Cc", "dave@example.com"),
                    header("Subject", "Quarterly numbers"),
                ],
                body: None,
                parts: vec![
                    text_part("text/plain", "plain body"),
                    text_part("text/html", "<p>html body</p>"),
                ],
            }),
        }
    }

    #[test]
    fn transforms_full_message() {
        let record = record_from_message(&sample_message()).unwrap();

        assert_eq!(record.message_id, "m1");
        assert_eq!(record.thread_id, "t1");
        assert_eq!(record.sender.as_ref().unwrap().email, "jane@example.com");
        assert_eq!(record.recipients.to.len(), 2);
        assert_eq!(record.recipients.cc.len(), 1);
        assert!(record.recipients.bcc.is_empty());
        assert_eq!(record.subject.as_deref(), Some("Quarterly numbers"));
        assert_eq!(record.body.as_deref(), Some("plain body"));
        assert_eq!(record.size_bytes, 2048);
        assert_eq!(record.internal_date.timestamp_millis(), 1_700_000_000_000);
        assert!(!record.is_read);
        assert!(!record.is_outgoing);
    }

    #[test]
    fn read_and_outgoing_flags_follow_labels() {
        let mut msg = sample_message();
        msg.label_ids = vec!["SENT".to_string()];

        let record = record_from_message(&msg).unwrap();
        assert!(record.is_read);
        assert!(record.is_outgoing);
    }

    #[test]
    fn falls_back_to_html_body() {
        let mut msg = sample_message();
        msg.payload.as_mut().unwrap().parts.remove(0);

        let record = record_from_message(&msg).unwrap();
        assert_eq!(record.body.as_deref(), Some("<p>html body</p>"));
    }

    #[test]
    fn missing_internal_date_is_permanent() {
        let mut msg = sample_message();
        msg.internal_date = None;

        let err = record_from_message(&msg).unwrap_err();
        assert!(matches!(err, SyncError::PermanentFetch(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn bare_message_without_payload_still_transforms() {
        let msg = Message {
            id: "m2".to_string(),
            thread_id: None,
            label_ids: vec![],
            internal_date: Some("0".to_string()),
            size_estimate: None,
            payload: None,
        };

        let record = record_from_message(&msg).unwrap();
        assert_eq!(record.thread_id, "m2");
        assert_eq!(record.sender, None);
        assert_eq!(record.body, None);
        assert_eq!(record.size_bytes, 0);
        assert!(record.is_read);
    }

    #[test]
    fn tolerates_padded_body_data() {
        let mut part = text_part("text/plain", "abc");
        part.body.as_mut().unwrap().data =
            Some(base64::engine::general_purpose::URL_SAFE.encode("abc"));

        let mut msg = sample_message();
        msg.payload.as_mut().unwrap().parts[0] = part;

        let record = record_from_message(&msg).unwrap();
        assert_eq!(record.body.as_deref(), Some("abc"));
    }
}
