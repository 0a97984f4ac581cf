//! The send flow: optimistic updates, streaming and persistence.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::StoreError;
use crate::gateway::{AssistantBackend, AssistantRequest, ConversationGateway, Persisted};
use crate::identity::Identity;
use crate::message::{derive_subject, Message, NewConversation};
use crate::round::{Round, RoundReport};
use crate::store::{Conversation, ConversationKey, ConversationStore, StoreEvent};

/// Reason recorded when the assistant answers without a body.
pub const NO_RESPONSE_BODY: &str = "No response body";

enum Step<T> {
    Cancelled,
    Ready(T),
}

/// A chat client bound to one assistant service and one store of record.
///
/// All methods take `&self`; several rounds may run at once, each keyed by
/// its own conversation. The store lock is never held across an `.await`.
pub struct ChatSession<A, G> {
    assistant: A,
    gateway: G,
    identity: Identity,
    store: Mutex<ConversationStore>,
    cancellations: Mutex<HashMap<ConversationKey, CancellationToken>>,
}

impl<A, G> ChatSession<A, G>
where
    A: AssistantBackend,
    G: ConversationGateway,
{
    pub fn new(assistant: A, gateway: G, identity: Identity) -> Self {
        Self {
            assistant,
            gateway,
            identity,
            store: Mutex::new(ConversationStore::new()),
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    fn store(&self) -> MutexGuard<'_, ConversationStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancellations(&self) -> MutexGuard<'_, HashMap<ConversationKey, CancellationToken>> {
        self.cancellations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn greeting(&self) -> String {
        self.identity.greeting()
    }

    pub fn assistant(&self) -> &A {
        &self.assistant
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Runs `f` against the current store contents.
    pub fn with_store<R>(&self, f: impl FnOnce(&ConversationStore) -> R) -> R {
        f(&self.store())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store().subscribe()
    }

    pub fn conversation(&self, key: ConversationKey) -> Option<Conversation> {
        self.store().get(key).cloned()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.store().conversations().to_vec()
    }

    pub fn selected(&self) -> Option<ConversationKey> {
        self.store().selected()
    }

    pub fn search(&self, query: &str) -> Vec<Conversation> {
        self.store().search(query).into_iter().cloned().collect()
    }

    /// Whether the assistant is replying in `key`.
    pub fn is_typing(&self, key: ConversationKey) -> bool {
        self.store().is_streaming(key)
    }

    /// Clears the selection; the next send starts a new conversation.
    pub fn new_conversation(&self) {
        self.store().clear_selection();
    }

    /// Loads every conversation from the store of record.
    ///
    /// Selects the most recently updated one when nothing is selected.
    /// Returns the number of conversations listed.
    #[instrument(skip(self))]
    pub async fn load_history(&self) -> usize {
        if !self.identity.is_authenticated() {
            return 0;
        }

        let listed = match self.gateway.list().await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(error = %e, "failed to load conversations");
                return 0;
            }
        };

        let count = listed.len();
        let mut store = self.store();
        store.merge_remote(listed);
        if store.selected().is_none() {
            let newest = store
                .conversations()
                .iter()
                .find(|c| !c.is_pending())
                .map(Conversation::key);
            if let Some(key) = newest {
                store.select(key).ok();
            }
        }
        debug!(count, "conversations loaded");
        count
    }

    /// Selects a conversation and refreshes it from the store of record.
    pub async fn select(&self, key: ConversationKey) -> Result<(), StoreError> {
        let id = {
            let mut store = self.store();
            store.select(key)?;
            store.get(key).and_then(|c| c.id().map(str::to_owned))
        };
        if let Some(id) = id {
            self.refresh(&id).await;
        }
        Ok(())
    }

    pub async fn select_id(&self, id: &str) -> Result<(), StoreError> {
        let key = self
            .store()
            .key_for_id(id)
            .ok_or_else(|| StoreError::UnknownId(id.to_string()))?;
        self.select(key).await
    }

    async fn refresh(&self, id: &str) {
        if !self.identity.is_authenticated() {
            return;
        }
        match self.gateway.list().await {
            Ok(listed) => {
                let Some(remote) = listed.into_iter().find(|c| c.id == id) else {
                    return;
                };
                let refreshed = self.store().refresh_conversation(remote);
                match refreshed {
                    Ok(applied) => debug!(id, applied, "conversation refreshed"),
                    Err(e) => warn!(error = %e, "failed to refresh conversation"),
                }
            }
            Err(e) => warn!(error = %e, "failed to refresh conversation"),
        }
    }

    /// Cancels every round streaming into `key`.
    ///
    /// Returns whether any round was in flight.
    pub fn cancel(&self, key: ConversationKey) -> bool {
        let (streaming, token) = {
            let store = self.store();
            (store.is_streaming(key), self.cancellations().remove(&key))
        };
        if let Some(token) = token {
            token.cancel();
        }
        streaming
    }

    /// Sends user input and streams the reply into the conversation.
    ///
    /// Returns `None` for blank input. Every fault is turned into local state,
    /// so this never fails.
    #[instrument(skip(self, input))]
    pub async fn handle_send(&self, input: &str) -> Option<RoundReport> {
        let text = input.trim();
        if text.is_empty() {
            return None;
        }

        let selected = self.store().selected();
        let key = match selected {
            Some(key) => key,
            None => self.create_conversation(text).await,
        };

        let user_message = Message::user(text).at(Utc::now());
        let prepared = self.prepare_round(key, &user_message);
        let (mut round, history, cancel) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, "cannot start round");
                return None;
            }
        };
        debug!(round = %round.id(), conversation = %key, "round started");

        self.persist(key, &user_message).await;

        let request = AssistantRequest {
            content: text.to_string(),
            history,
        };
        let final_text = self.stream(&mut round, &request, &cancel).await;

        if let Some(final_text) = final_text {
            self.persist(key, &Message::assistant(final_text).at(Utc::now())).await;
        }

        {
            let mut store = self.store();
            store.finish_round(round.id(), round.reply_index());
            if !store.is_streaming(key) {
                self.cancellations().remove(&key);
            }
        }

        let report = round.report();
        debug!(round = %report.round, state = ?report.state, "round finished");
        Some(report)
    }

    async fn create_conversation(&self, text: &str) -> ConversationKey {
        let subject = derive_subject(text);
        let key = {
            let mut store = self.store();
            let key = store.insert_pending(subject.clone());
            if let Err(e) = store.select_created(key) {
                warn!(error = %e, "failed to select new conversation");
            }
            key
        };

        if !self.identity.is_authenticated() {
            return key;
        }

        let draft = NewConversation {
            subject,
            messages: Vec::new(),
        };
        match self.gateway.create(&draft).await {
            Ok(Persisted::Accepted(created)) => {
                let assigned = self.store().assign_id(key, created.id);
                if let Err(e) = assigned {
                    warn!(error = %e, "failed to record conversation id");
                }
            }
            Ok(Persisted::Rejected { status, reason }) => {
                warn!(?status, reason = %reason, "conversation creation rejected");
            }
            Err(e) => warn!(error = %e, "failed to create conversation"),
        }
        key
    }

    /// Appends the user message and registers the round.
    ///
    /// The cancellation token is handed out under the same store lock that
    /// marks the conversation as streaming, so `cancel` sees both or neither.
    /// Lock order is store, then cancellations.
    fn prepare_round(
        &self,
        key: ConversationKey,
        user_message: &Message,
    ) -> Result<(Round, Vec<Message>, CancellationToken), StoreError> {
        let mut store = self.store();
        let history = store
            .get(key)
            .map(|c| c.messages().to_vec())
            .ok_or(StoreError::UnknownConversation(key))?;
        store.append(key, user_message.clone())?;
        let id = store.begin_round(key)?;
        let cancel = self.cancellations().entry(key).or_default().clone();

        let mut round = Round::new(id, key);
        round.start();
        Ok((round, history, cancel))
    }

    /// Persists one message. Failures are logged and otherwise ignored; the
    /// in-memory conversation stays as displayed.
    async fn persist(&self, key: ConversationKey, message: &Message) {
        if !self.identity.is_authenticated() {
            return;
        }
        let id = self.store().get(key).and_then(|c| c.id().map(str::to_owned));
        let Some(id) = id else {
            debug!(conversation = %key, "conversation has no id, not persisting");
            return;
        };

        match self.gateway.append(&id, message).await {
            Ok(Persisted::Accepted(_)) => {}
            Ok(Persisted::Rejected { status, reason }) => {
                warn!(?status, reason = %reason, sender = %message.sender, "message persistence rejected");
            }
            Err(e) => warn!(error = %e, sender = %message.sender, "failed to persist message"),
        }
    }

    /// Reads the response into the round. Returns the text to persist.
    async fn stream(
        &self,
        round: &mut Round,
        request: &AssistantRequest,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Step::Cancelled,
            opened = self.assistant.open_stream(request) => Step::Ready(opened),
        };

        let mut body = match opened {
            Step::Cancelled => {
                round.cancel();
                return None;
            }
            Step::Ready(Ok(Some(body))) => body,
            Step::Ready(Ok(None)) => {
                self.fail(round, NO_RESPONSE_BODY);
                return None;
            }
            Step::Ready(Err(e)) => {
                self.fail(round, &e.to_string());
                return None;
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                next = body.next() => Step::Ready(next),
            };

            match next {
                Step::Cancelled => {
                    debug!(round = %round.id(), "round cancelled");
                    round.cancel();
                    return None;
                }
                Step::Ready(Some(Ok(chunk))) => {
                    let applied = round.apply_chunk(&mut self.store(), &chunk);
                    if let Err(e) = applied {
                        warn!(error = %e, round = %round.id(), "failed to apply chunk");
                    }
                }
                Step::Ready(Some(Err(e))) => {
                    self.fail(round, &e.to_string());
                    return None;
                }
                Step::Ready(None) => {
                    let completed = round.complete(&mut self.store());
                    return match completed {
                        Ok(final_text) => final_text,
                        Err(e) => {
                            warn!(error = %e, round = %round.id(), "failed to complete round");
                            None
                        }
                    };
                }
            }
        }
    }

    fn fail(&self, round: &mut Round, reason: &str) {
        debug!(round = %round.id(), reason, "round failed");
        let failed = round.fail(&mut self.store(), reason);
        if let Err(e) = failed {
            warn!(error = %e, round = %round.id(), "failed to record round failure");
        }
    }
}
