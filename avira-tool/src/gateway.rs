use avira_core::{
    ConversationGateway, MemoryGateway, MemoryGatewayError, Message, NewConversation, Persisted,
    RemoteConversation,
};
use avira_http::{ChatsClient, HttpError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnyGatewayError {
    #[error("chats API error: {0}")]
    Remote(#[from] HttpError),
    #[error("offline store error: {0}")]
    Offline(#[from] MemoryGatewayError),
}

/// Store of record selected at startup.
pub enum AnyGateway {
    Remote(ChatsClient),
    /// Process-local, lost on exit.
    Offline(MemoryGateway),
}

impl AnyGateway {
    pub fn is_offline(&self) -> bool {
        matches!(self, AnyGateway::Offline(_))
    }
}

impl ConversationGateway for AnyGateway {
    type Error = AnyGatewayError;

    async fn list(&self) -> Result<Vec<RemoteConversation>, Self::Error> {
        match self {
            AnyGateway::Remote(client) => Ok(client.list().await?),
            AnyGateway::Offline(memory) => Ok(memory.list().await?),
        }
    }

    async fn create(
        &self,
        conversation: &NewConversation,
    ) -> Result<Persisted<RemoteConversation>, Self::Error> {
        match self {
            AnyGateway::Remote(client) => Ok(client.create(conversation).await?),
            AnyGateway::Offline(memory) => Ok(memory.create(conversation).await?),
        }
    }

    async fn append(
        &self,
        conversation_id: &str,
        message: &Message,
    ) -> Result<Persisted<RemoteConversation>, Self::Error> {
        match self {
            AnyGateway::Remote(client) => Ok(client.append(conversation_id, message).await?),
            AnyGateway::Offline(memory) => Ok(memory.append(conversation_id, message).await?),
        }
    }
}
