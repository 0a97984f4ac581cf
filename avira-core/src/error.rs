use thiserror::Error;

use crate::store::ConversationKey;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Unknown conversation: {0}")]
    UnknownConversation(ConversationKey),

    #[error("Unknown conversation id: {0}")]
    UnknownId(String),

    #[error("Conversation {0} is still pending and cannot be selected")]
    Pending(ConversationKey),

    #[error("Conversation {key} already has id {existing}")]
    IdAlreadyAssigned { key: ConversationKey, existing: String },

    #[error("Conversation {key} has no message at index {index}")]
    NoSuchMessage { key: ConversationKey, index: usize },

    #[error("Message {index} of conversation {key} is not an assistant message")]
    NotAssistant { key: ConversationKey, index: usize },
}
