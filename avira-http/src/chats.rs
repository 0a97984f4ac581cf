use avira_core::{ConversationGateway, Message, NewConversation, Persisted, RemoteConversation};
use reqwest::{Method, RequestBuilder};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::client::check_status;
use crate::convert::{error_detail, parse_conversation, parse_conversations};
use crate::error::HttpError;
use crate::types::AppendRequest;

const CHATS_PATH: &str = "/api/chats";

/// Client for the chats API of the store of record.
///
/// Requests carry the session token as a bearer token. Client errors (such
/// as `401 Unauthorized`) are reported as [`Persisted::Rejected`]; server
/// errors are failures.
pub struct ChatsClient {
    http: reqwest::Client,
    base_url: String,
    session_token: Option<String>,
}

impl ChatsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, CHATS_PATH));
        match &self.session_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Persisted<Value>, HttpError> {
        let response = builder.send().await?;
        let status = response.status();

        if status.is_client_error() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let reason = error_detail(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("Rejected").to_string());
            debug!(status = status.as_u16(), reason = %reason, "Request rejected");
            return Ok(Persisted::Rejected {
                status: Some(status.as_u16()),
                reason,
            });
        }

        let response = check_status(response).await?;
        Ok(Persisted::Accepted(response.json().await?))
    }

    fn accept(value: &Value) -> Result<Persisted<RemoteConversation>, HttpError> {
        // The chats API answers `null` when the chat does not belong to the caller.
        if value.is_null() {
            return Ok(Persisted::Rejected {
                status: None,
                reason: "Conversation not found".to_string(),
            });
        }
        Ok(Persisted::Accepted(parse_conversation(value)?))
    }
}

impl ConversationGateway for ChatsClient {
    type Error = HttpError;

    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn list(&self) -> Result<Vec<RemoteConversation>, HttpError> {
        match self.send(self.request(Method::GET)).await? {
            Persisted::Accepted(body) => parse_conversations(&body),
            Persisted::Rejected { .. } => Ok(Vec::new()),
        }
    }

    #[instrument(skip(self, conversation), fields(subject = %conversation.subject))]
    async fn create(&self, conversation: &NewConversation) -> Result<Persisted<RemoteConversation>, HttpError> {
        match self.send(self.request(Method::POST).json(conversation)).await? {
            Persisted::Accepted(body) => Self::accept(&body),
            Persisted::Rejected { status, reason } => Ok(Persisted::Rejected { status, reason }),
        }
    }

    #[instrument(skip(self, message), fields(sender = %message.sender))]
    async fn append(&self, conversation_id: &str, message: &Message) -> Result<Persisted<RemoteConversation>, HttpError> {
        let body = AppendRequest {
            chat_id: conversation_id,
            message,
        };
        match self.send(self.request(Method::PUT).json(&body)).await? {
            Persisted::Accepted(body) => Self::accept(&body),
            Persisted::Rejected { status, reason } => Ok(Persisted::Rejected { status, reason }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ChatsClient::new("http://localhost:3000/");
        assert_eq!(client.base_url(), "http://localhost:3000");
        assert_eq!(client.session_token, None);
    }

    #[test]
    fn test_null_is_rejected() {
        match ChatsClient::accept(&Value::Null) {
            Ok(Persisted::Rejected { status: None, .. }) => {}
            other => panic!("Expected rejection, got {:?}", other),
        }
    }
}
