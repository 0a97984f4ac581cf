use avira_core::Message;
use serde::{Deserialize, Serialize};

/// Body of `PUT /api/chats`.
#[derive(Debug, Serialize)]
pub struct AppendRequest<'a> {
    #[serde(rename = "chatId")]
    pub chat_id: &'a str,
    pub message: &'a Message,
}

/// Response of the assistant's health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}
