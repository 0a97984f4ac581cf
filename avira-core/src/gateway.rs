//! Seams to the external collaborators.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::message::{Message, NewConversation, RemoteConversation};

/// Outcome of a write against the store of record.
///
/// A rejection (for example an unauthenticated caller) is a signal, not a
/// fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persisted<T> {
    Accepted(T),
    Rejected { status: Option<u16>, reason: String },
}

impl<T> Persisted<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Persisted::Accepted(_))
    }
}

/// CRUD access to the store of record for conversations.
///
/// Implementations must be usable from several concurrent rounds.
pub trait ConversationGateway: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// All conversations of the current identity, most recently updated first.
    fn list(&self) -> impl Future<Output = Result<Vec<RemoteConversation>, Self::Error>> + Send;

    /// Creates a conversation; the result carries the assigned id.
    fn create(
        &self,
        conversation: &NewConversation,
    ) -> impl Future<Output = Result<Persisted<RemoteConversation>, Self::Error>> + Send;

    /// Appends one message to an existing conversation.
    fn append(
        &self,
        conversation_id: &str,
        message: &Message,
    ) -> impl Future<Output = Result<Persisted<RemoteConversation>, Self::Error>> + Send;
}

/// Body of a request to the assistant service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantRequest {
    pub content: String,
    pub history: Vec<Message>,
}

/// Raw response body of the assistant service.
pub type ByteStream<E> = Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>;

/// The streaming assistant service.
pub trait AssistantBackend: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends the request and returns the response body.
    ///
    /// `Ok(None)` means the response arrived without a body.
    fn open_stream(
        &self,
        request: &AssistantRequest,
    ) -> impl Future<Output = Result<Option<ByteStream<Self::Error>>, Self::Error>> + Send;
}
