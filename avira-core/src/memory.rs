use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::gateway::{ConversationGateway, Persisted};
use crate::message::{Message, NewConversation, RemoteConversation};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryGatewayError {
    #[error("store of record unavailable")]
    Unavailable,
}

#[derive(Debug)]
struct Record {
    conversation: RemoteConversation,
    revision: u64,
}

#[derive(Debug)]
struct State {
    records: Vec<Record>,
    revision: u64,
    authenticated: bool,
    available: bool,
}

/// An in-memory store of record.
///
/// Useful for testing and offline use. Ids are random uuids and listings are
/// ordered by most recent write.
#[derive(Debug)]
pub struct MemoryGateway {
    state: RwLock<State>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    /// A gateway serving an authenticated identity.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                records: Vec::new(),
                revision: 0,
                authenticated: true,
                available: true,
            }),
        }
    }

    /// A gateway that treats every caller as signed out.
    pub fn anonymous() -> Self {
        let gateway = Self::new();
        gateway.set_authenticated(false);
        gateway
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.write().authenticated = authenticated;
    }

    /// Makes every call fail as if the network were down.
    pub fn set_available(&self, available: bool) {
        self.write().available = available;
    }

    /// Current content of a conversation.
    pub fn get(&self, id: &str) -> Option<RemoteConversation> {
        self.read()
            .records
            .iter()
            .find(|r| r.conversation.id == id)
            .map(|r| r.conversation.clone())
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    /// Seeds a conversation directly, bypassing authentication.
    pub fn insert(&self, subject: &str, messages: Vec<Message>) -> String {
        let mut state = self.write();
        Self::create_record(&mut state, subject, messages).id
    }

    fn create_record(state: &mut State, subject: &str, messages: Vec<Message>) -> RemoteConversation {
        state.revision += 1;
        let conversation = RemoteConversation {
            id: Uuid::new_v4().simple().to_string(),
            subject: subject.to_string(),
            messages,
            updated_at: Some(Utc::now()),
        };
        state.records.push(Record {
            conversation: conversation.clone(),
            revision: state.revision,
        });
        conversation
    }

    fn check(state: &State) -> Result<Option<Persisted<RemoteConversation>>, MemoryGatewayError> {
        if !state.available {
            return Err(MemoryGatewayError::Unavailable);
        }
        if !state.authenticated {
            return Ok(Some(Persisted::Rejected {
                status: Some(401),
                reason: "Unauthorized".to_string(),
            }));
        }
        Ok(None)
    }
}

impl ConversationGateway for MemoryGateway {
    type Error = MemoryGatewayError;

    async fn list(&self) -> Result<Vec<RemoteConversation>, Self::Error> {
        let state = self.read();
        if !state.available {
            return Err(MemoryGatewayError::Unavailable);
        }
        if !state.authenticated {
            return Ok(Vec::new());
        }

        let mut records: Vec<&Record> = state.records.iter().collect();
        records.sort_by(|a, b| b.revision.cmp(&a.revision));
        Ok(records.into_iter().map(|r| r.conversation.clone()).collect())
    }

    async fn create(&self, conversation: &NewConversation) -> Result<Persisted<RemoteConversation>, Self::Error> {
        let mut state = self.write();
        if let Some(rejected) = Self::check(&state)? {
            return Ok(rejected);
        }
        if conversation.subject.is_empty() {
            return Ok(Persisted::Rejected {
                status: Some(400),
                reason: "Missing data".to_string(),
            });
        }

        let created = Self::create_record(&mut state, &conversation.subject, conversation.messages.clone());
        Ok(Persisted::Accepted(created))
    }

    async fn append(&self, conversation_id: &str, message: &Message) -> Result<Persisted<RemoteConversation>, Self::Error> {
        let mut state = self.write();
        if let Some(rejected) = Self::check(&state)? {
            return Ok(rejected);
        }

        state.revision += 1;
        let revision = state.revision;
        let Some(record) = state
            .records
            .iter_mut()
            .find(|r| r.conversation.id == conversation_id)
        else {
            return Ok(Persisted::Rejected {
                status: Some(404),
                reason: format!("Unknown conversation: {}", conversation_id),
            });
        };

        let mut message = message.clone();
        message.created_at.get_or_insert_with(Utc::now);
        record.conversation.messages.push(message);
        record.conversation.updated_at = Some(Utc::now());
        record.revision = revision;
        Ok(Persisted::Accepted(record.conversation.clone()))
    }
}
