//! In-memory conversation store.
//!
//! The store is the local view of every conversation. It is a plain data
//! structure: the session mutates it inside short synchronous sections and
//! observers follow changes through [`ConversationStore::subscribe`].

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::StoreError;
use crate::message::{derive_subject, Message, RemoteConversation, Sender};

const EVENT_CAPACITY: usize = 256;

/// Process-local handle of a conversation.
///
/// Assigned when the conversation enters the store, before the store of record
/// has given it an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey(u64);

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of one streaming round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoundId(u64);

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "round-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    key: ConversationKey,
    id: Option<String>,
    subject: String,
    messages: Vec<Message>,
    updated_at: Option<DateTime<Utc>>,
}

impl Conversation {
    fn pending(key: ConversationKey, subject: String) -> Self {
        Self {
            key,
            id: None,
            subject,
            messages: Vec::new(),
            updated_at: None,
        }
    }

    fn from_remote(key: ConversationKey, remote: RemoteConversation) -> Self {
        Self {
            key,
            id: Some(remote.id),
            subject: remote.subject,
            messages: remote.messages,
            updated_at: remote.updated_at,
        }
    }

    /// Takes the store of record's view, unless it knows fewer messages than
    /// we display locally.
    fn apply_remote(&mut self, remote: RemoteConversation) -> bool {
        self.subject = remote.subject;
        self.updated_at = remote.updated_at.or(self.updated_at);
        if remote.messages.len() < self.messages.len() {
            return false;
        }
        self.messages = remote.messages;
        true
    }

    pub fn key(&self) -> ConversationKey {
        self.key
    }

    /// Id assigned by the store of record, if any.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_pending(&self) -> bool {
        self.id.is_none()
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

/// Change notifications emitted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    ConversationAdded(ConversationKey),
    ConversationIdentified { key: ConversationKey, id: String },
    /// A listed copy of `key` was folded into it and no longer exists.
    ConversationMerged { duplicate: ConversationKey, key: ConversationKey },
    MessageAppended { key: ConversationKey, index: usize, sender: Sender },
    MessageUpdated { key: ConversationKey, index: usize },
    SelectionChanged(Option<ConversationKey>),
    RoundStarted { round: RoundId, key: ConversationKey },
    /// `reply` is the index of the message the round ended with, if any.
    RoundFinished {
        round: RoundId,
        key: ConversationKey,
        reply: Option<usize>,
    },
    Refreshed,
}

pub struct ConversationStore {
    conversations: Vec<Conversation>,
    selected: Option<ConversationKey>,
    next_key: u64,
    next_round: u64,
    active_rounds: HashMap<RoundId, ConversationKey>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationStore")
            .field("conversations", &self.conversations)
            .field("selected", &self.selected)
            .field("active_rounds", &self.active_rounds)
            .finish()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            conversations: Vec::new(),
            selected: None,
            next_key: 1,
            next_round: 1,
            active_rounds: HashMap::new(),
            events,
        }
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: StoreEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn allocate_key(&mut self) -> ConversationKey {
        let key = ConversationKey(self.next_key);
        self.next_key += 1;
        key
    }

    /// Adds a conversation that the store of record does not know yet.
    pub fn insert_pending(&mut self, subject: impl Into<String>) -> ConversationKey {
        let key = self.allocate_key();
        self.conversations.push(Conversation::pending(key, subject.into()));
        self.emit(StoreEvent::ConversationAdded(key));
        key
    }

    /// Records the id the store of record assigned. Ids are assigned once.
    ///
    /// A listing merged while the conversation was being created may already
    /// hold a copy under the same id; that copy is folded into `key`.
    pub fn assign_id(&mut self, key: ConversationKey, id: impl Into<String>) -> Result<(), StoreError> {
        let id = id.into();
        let conversation = self.get_mut(key)?;
        if let Some(existing) = &conversation.id {
            return Err(StoreError::IdAlreadyAssigned {
                key,
                existing: existing.clone(),
            });
        }
        conversation.id = Some(id.clone());

        let duplicate = self
            .conversations
            .iter()
            .position(|c| c.key != key && c.id.as_deref() == Some(id.as_str()));
        if let Some(index) = duplicate {
            self.fold_duplicate(index, key);
        }

        self.emit(StoreEvent::ConversationIdentified { key, id });
        Ok(())
    }

    /// Replaces the conversation at `index` with `key`, keeping the listing
    /// position and moving the selection over.
    fn fold_duplicate(&mut self, index: usize, key: ConversationKey) {
        let duplicate = self.conversations.remove(index);
        let Some(pos) = self.conversations.iter().position(|c| c.key == key) else {
            return;
        };
        let mut conversation = self.conversations.remove(pos);

        if duplicate.messages.len() > conversation.messages.len() && !self.is_streaming(key) {
            conversation.messages = duplicate.messages;
        }
        conversation.updated_at = duplicate.updated_at.or(conversation.updated_at);

        let at = if pos < index { index - 1 } else { index };
        self.conversations.insert(at.min(self.conversations.len()), conversation);

        if self.selected == Some(duplicate.key) {
            self.set_selection(Some(key));
        }
        debug!(duplicate = %duplicate.key, key = %key, "folded listed copy into new conversation");
        self.emit(StoreEvent::ConversationMerged {
            duplicate: duplicate.key,
            key,
        });
    }

    pub fn get(&self, key: ConversationKey) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.key == key)
    }

    fn get_mut(&mut self, key: ConversationKey) -> Result<&mut Conversation, StoreError> {
        self.conversations
            .iter_mut()
            .find(|c| c.key == key)
            .ok_or(StoreError::UnknownConversation(key))
    }

    pub fn key_for_id(&self, id: &str) -> Option<ConversationKey> {
        self.conversations
            .iter()
            .find(|c| c.id.as_deref() == Some(id))
            .map(|c| c.key)
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn selected(&self) -> Option<ConversationKey> {
        self.selected
    }

    pub fn selected_conversation(&self) -> Option<&Conversation> {
        self.selected.and_then(|key| self.get(key))
    }

    /// Selects an identified conversation.
    pub fn select(&mut self, key: ConversationKey) -> Result<(), StoreError> {
        let conversation = self.get(key).ok_or(StoreError::UnknownConversation(key))?;
        if conversation.is_pending() {
            return Err(StoreError::Pending(key));
        }
        self.set_selection(Some(key));
        Ok(())
    }

    /// Selects a conversation regardless of its pending state.
    ///
    /// Only the flow that created a pending conversation may use this.
    pub(crate) fn select_created(&mut self, key: ConversationKey) -> Result<(), StoreError> {
        self.get(key).ok_or(StoreError::UnknownConversation(key))?;
        self.set_selection(Some(key));
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.set_selection(None);
    }

    fn set_selection(&mut self, selected: Option<ConversationKey>) {
        if self.selected != selected {
            self.selected = selected;
            self.emit(StoreEvent::SelectionChanged(selected));
        }
    }

    /// Appends a message and returns its index.
    ///
    /// The first user message of an empty conversation also sets its subject.
    pub fn append(&mut self, key: ConversationKey, message: Message) -> Result<usize, StoreError> {
        let conversation = self.get_mut(key)?;
        if conversation.messages.is_empty() && message.sender == Sender::User {
            conversation.subject = derive_subject(&message.text);
        }
        let sender = message.sender;
        conversation.messages.push(message);
        let index = conversation.messages.len() - 1;
        self.emit(StoreEvent::MessageAppended { key, index, sender });
        Ok(index)
    }

    /// Replaces the text of the assistant message at `index`.
    pub fn replace_assistant_text(
        &mut self,
        key: ConversationKey,
        index: usize,
        text: impl Into<String>,
    ) -> Result<(), StoreError> {
        let conversation = self.get_mut(key)?;
        let message = conversation
            .messages
            .get_mut(index)
            .ok_or(StoreError::NoSuchMessage { key, index })?;
        if message.sender != Sender::Assistant {
            return Err(StoreError::NotAssistant { key, index });
        }
        message.text = text.into();
        self.emit(StoreEvent::MessageUpdated { key, index });
        Ok(())
    }

    /// Registers a new round targeting `key`.
    pub fn begin_round(&mut self, key: ConversationKey) -> Result<RoundId, StoreError> {
        self.get(key).ok_or(StoreError::UnknownConversation(key))?;
        let round = RoundId(self.next_round);
        self.next_round += 1;
        self.active_rounds.insert(round, key);
        self.emit(StoreEvent::RoundStarted { round, key });
        Ok(round)
    }

    pub fn finish_round(&mut self, round: RoundId, reply: Option<usize>) {
        if let Some(key) = self.active_rounds.remove(&round) {
            self.emit(StoreEvent::RoundFinished { round, key, reply });
        }
    }

    /// Whether any round is streaming into `key`.
    pub fn is_streaming(&self, key: ConversationKey) -> bool {
        self.active_rounds.values().any(|k| *k == key)
    }

    pub fn active_rounds(&self) -> usize {
        self.active_rounds.len()
    }

    /// Merges a listing from the store of record.
    ///
    /// Known conversations take the remote content unless a round is
    /// streaming into them or they hold optimistic messages the remote does
    /// not have yet. Order follows the listing; conversations the listing
    /// does not mention keep their relative order after it.
    pub fn merge_remote(&mut self, remote: Vec<RemoteConversation>) {
        let mut rest = std::mem::take(&mut self.conversations);
        let mut merged = Vec::with_capacity(rest.len() + remote.len());
        let mut added = Vec::new();

        for conversation in remote {
            let found = rest
                .iter()
                .position(|c| c.id.as_deref() == Some(conversation.id.as_str()));
            match found {
                Some(pos) => {
                    let mut local = rest.remove(pos);
                    if self.is_streaming(local.key) {
                        debug!(key = %local.key, "skipping refresh of streaming conversation");
                    } else if !local.apply_remote(conversation) {
                        debug!(key = %local.key, "keeping optimistic messages");
                    }
                    merged.push(local);
                }
                None => {
                    let key = self.allocate_key();
                    merged.push(Conversation::from_remote(key, conversation));
                    added.push(key);
                }
            }
        }

        merged.extend(rest);
        self.conversations = merged;

        for key in added {
            self.emit(StoreEvent::ConversationAdded(key));
        }
        self.emit(StoreEvent::Refreshed);
    }

    /// Refreshes one conversation from the store of record.
    ///
    /// Returns `false` when the refresh was skipped.
    pub fn refresh_conversation(&mut self, remote: RemoteConversation) -> Result<bool, StoreError> {
        let key = self
            .key_for_id(&remote.id)
            .ok_or_else(|| StoreError::UnknownId(remote.id.clone()))?;
        if self.is_streaming(key) {
            return Ok(false);
        }
        let applied = self.get_mut(key)?.apply_remote(remote);
        if applied {
            self.emit(StoreEvent::Refreshed);
        }
        Ok(applied)
    }

    /// Conversations whose subject contains `query`, ignoring case.
    pub fn search(&self, query: &str) -> Vec<&Conversation> {
        let needle = query.trim().to_lowercase();
        self.conversations
            .iter()
            .filter(|c| needle.is_empty() || c.subject.to_lowercase().contains(&needle))
            .collect()
    }
}
