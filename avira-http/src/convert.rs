use avira_core::{Message, RemoteConversation};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::HttpError;

/// Reads a document id, either a plain string or `{"$oid": "..."}`.
fn document_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Object(map) => map.get("$oid").and_then(|o| o.as_str()).map(String::from),
        _ => None,
    }
}

fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let raw = match value {
        Value::String(s) => s.as_str(),
        // Extended JSON
        Value::Object(map) => map.get("$date").and_then(|d| d.as_str())?,
        _ => return None,
    };
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_message(value: &Value) -> Result<Message, HttpError> {
    let mut message = value.clone();
    // Decoded separately to accept extended JSON dates.
    let created_at = value.get("createdAt").and_then(timestamp);
    if let Some(map) = message.as_object_mut() {
        map.remove("createdAt");
    }
    let message: Message = serde_json::from_value(message)?;
    Ok(Message { created_at, ..message })
}

/// Parses one chat document of the store of record.
pub fn parse_conversation(value: &Value) -> Result<RemoteConversation, HttpError> {
    let id = value
        .get("_id")
        .or_else(|| value.get("id"))
        .and_then(document_id)
        .ok_or(HttpError::MissingId)?;

    let subject = value
        .get("subject")
        .and_then(|s| s.as_str())
        .unwrap_or("")
        .to_string();

    let messages = match value.get("messages").and_then(|m| m.as_array()) {
        Some(items) => items.iter().map(parse_message).collect::<Result<_, _>>()?,
        None => Vec::new(),
    };

    let updated_at = value.get("updatedAt").and_then(timestamp);

    Ok(RemoteConversation {
        id,
        subject,
        messages,
        updated_at,
    })
}

/// Parses a chat listing, keeping the server's order.
pub fn parse_conversations(value: &Value) -> Result<Vec<RemoteConversation>, HttpError> {
    let items = value
        .as_array()
        .ok_or_else(|| HttpError::UnexpectedResponse(format!("expected a list of chats, got {}", value)))?;
    items.iter().map(parse_conversation).collect()
}

/// Extracts a human-readable error from a response body.
///
/// Understands FastAPI's `detail` (string or validation list) and the
/// `error` field of the chats API.
pub fn error_detail(body: &Value) -> Option<String> {
    match body.get("detail") {
        Some(Value::String(detail)) => return Some(detail.clone()),
        Some(Value::Array(items)) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .collect();
            if !messages.is_empty() {
                return Some(messages.join("; "));
            }
        }
        _ => {}
    }

    body.get("error")
        .and_then(|e| e.as_str())
        .map(String::from)
}
