use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of characters of the first user message kept in a subject.
pub const SUBJECT_MAX_CHARS: usize = 30;

/// Marker appended to every derived subject.
pub const SUBJECT_ELLIPSIS: &str = "...";

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
    /// Locally generated transport failure notice.
    Error,
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sender::User => write!(f, "user"),
            Sender::Assistant => write!(f, "assistant"),
            Sender::Error => write!(f, "error"),
        }
    }
}

/// A single entry in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender: Sender,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
            created_at: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Sender::Assistant, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Sender::Error, text)
    }

    /// Stamps the message with the given creation time.
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// A conversation as known by the store of record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConversation {
    pub id: String,
    pub subject: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Payload for creating a conversation in the store of record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConversation {
    pub subject: String,
    pub messages: Vec<Message>,
}

/// Derives a conversation subject from the first user input.
///
/// Keeps the first [`SUBJECT_MAX_CHARS`] characters of the trimmed input and
/// always appends [`SUBJECT_ELLIPSIS`].
pub fn derive_subject(input: &str) -> String {
    let mut subject: String = input.trim().chars().take(SUBJECT_MAX_CHARS).collect();
    subject.push_str(SUBJECT_ELLIPSIS);
    subject
}
