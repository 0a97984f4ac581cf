//! Stream reconciliation engine for the avira chat client.
//!
//! This crate turns a streamed assistant response into a single, in-place
//! updated assistant message per round, keeps an in-memory view of every
//! conversation and persists finished exchanges through a
//! [`ConversationGateway`].
//!
//! # Example
//!
//! ```
//! use avira_core::{ConversationStore, Message, Sender};
//!
//! let mut store = ConversationStore::new();
//! let key = store.insert_pending("Hello...");
//! store.append(key, Message::user("Hello")).unwrap();
//!
//! // A streamed reply updates one assistant message in place.
//! let reply = store.append(key, Message::assistant("Hi")).unwrap();
//! store.replace_assistant_text(key, reply, "Hi there!").unwrap();
//!
//! let conversation = store.get(key).unwrap();
//! assert_eq!(conversation.messages().len(), 2);
//! assert_eq!(conversation.messages()[1].sender, Sender::Assistant);
//! assert_eq!(conversation.messages()[1].text, "Hi there!");
//! ```

mod classifier;
mod decoder;
mod error;
mod gateway;
mod identity;
mod memory;
mod message;
mod round;
mod session;
mod store;

pub use classifier::{classify, Classification, FrameKind, FrameTracker, OUTPUT_FIELD};
pub use decoder::{TextAccumulator, Utf8Decoder};
pub use error::StoreError;
pub use gateway::{AssistantBackend, AssistantRequest, ByteStream, ConversationGateway, Persisted};
pub use identity::{Identity, UserProfile};
pub use memory::{MemoryGateway, MemoryGatewayError};
pub use message::{
    derive_subject, Message, NewConversation, RemoteConversation, Sender, SUBJECT_ELLIPSIS, SUBJECT_MAX_CHARS,
};
pub use round::{Round, RoundReport, RoundState, DEFAULT_FAILURE};
pub use session::{ChatSession, NO_RESPONSE_BODY};
pub use store::{Conversation, ConversationKey, ConversationStore, RoundId, StoreEvent};
