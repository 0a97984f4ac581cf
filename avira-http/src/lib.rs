//! HTTP clients for the avira chat client.
//!
//! [`AssistantClient`] streams replies from the assistant service and
//! [`ChatsClient`] talks to the chats API of the store of record. Both plug
//! into [`avira_core::ChatSession`].
//!
//! # Example
//!
//! ```ignore
//! use avira_core::{ChatSession, Identity};
//! use avira_http::{AssistantClient, ChatsClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     let assistant = AssistantClient::with_base_url("http://127.0.0.1:8000");
//!     let chats = ChatsClient::new("http://localhost:3000").with_session_token("token");
//!     let session = ChatSession::new(assistant, chats, identity);
//!
//!     session.load_history().await;
//!     session.handle_send("Hello!").await;
//! }
//! ```

mod chats;
mod client;
mod convert;
mod error;
mod types;

pub use chats::ChatsClient;
pub use client::AssistantClient;
pub use convert::{error_detail, parse_conversation, parse_conversations};
pub use error::HttpError;
pub use types::{AppendRequest, HealthStatus};
