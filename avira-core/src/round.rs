//! Per-round reconciliation of streamed text into the conversation store.
//!
//! A [`Round`] owns everything one user-message-to-reply exchange needs: the
//! decoded buffer, the classification tracker and the index of the assistant
//! message it writes. Nothing here depends on which conversation is selected.

use chrono::Utc;
use tracing::debug;

use crate::classifier::FrameTracker;
use crate::decoder::TextAccumulator;
use crate::error::StoreError;
use crate::message::Message;
use crate::store::{ConversationKey, ConversationStore, RoundId};

/// Shown when a transport fault carries no description of its own.
pub const DEFAULT_FAILURE: &str = "Failed to contact server";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Idle,
    AwaitingFirstFragment,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl RoundState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RoundState::Completed | RoundState::Failed | RoundState::Cancelled)
    }
}

/// Summary of a finished round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    pub round: RoundId,
    pub conversation: ConversationKey,
    pub state: RoundState,
    /// Index of the assistant message this round wrote, if any.
    pub assistant_index: Option<usize>,
    /// Final assistant text, or the failure reason.
    pub text: Option<String>,
}

#[derive(Debug)]
pub struct Round {
    id: RoundId,
    conversation: ConversationKey,
    state: RoundState,
    assistant_index: Option<usize>,
    error_index: Option<usize>,
    buffer: TextAccumulator,
    frames: FrameTracker,
    failure: Option<String>,
}

impl Round {
    pub fn new(id: RoundId, conversation: ConversationKey) -> Self {
        Self {
            id,
            conversation,
            state: RoundState::Idle,
            assistant_index: None,
            error_index: None,
            buffer: TextAccumulator::new(),
            frames: FrameTracker::new(),
            failure: None,
        }
    }

    pub fn id(&self) -> RoundId {
        self.id
    }

    pub fn conversation(&self) -> ConversationKey {
        self.conversation
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn assistant_index(&self) -> Option<usize> {
        self.assistant_index
    }

    /// Index of the message this round shows as its reply: the error
    /// message of a failed round, otherwise the assistant message.
    pub fn reply_index(&self) -> Option<usize> {
        self.error_index.or(self.assistant_index)
    }

    /// Best display string so far.
    pub fn display(&self) -> Option<&str> {
        self.frames.display()
    }

    /// The user message is in place; the response may start arriving.
    pub fn start(&mut self) {
        if self.state == RoundState::Idle {
            self.state = RoundState::AwaitingFirstFragment;
        }
    }

    /// Feeds one raw chunk of the response body.
    pub fn apply_chunk(&mut self, store: &mut ConversationStore, chunk: &[u8]) -> Result<(), StoreError> {
        if self.state.is_terminal() {
            debug!(round = %self.id, "chunk after round ended");
            return Ok(());
        }
        self.start();

        let buffer = self.buffer.push(chunk);
        let display = self.frames.observe(buffer).map(str::to_owned);
        match display {
            Some(display) => self.apply_display(store, display),
            None => Ok(()),
        }
    }

    fn apply_display(&mut self, store: &mut ConversationStore, display: String) -> Result<(), StoreError> {
        match self.assistant_index {
            Some(index) => store.replace_assistant_text(self.conversation, index, display),
            // Nothing to show yet.
            None if display.is_empty() => Ok(()),
            None => {
                let index = store.append(self.conversation, Message::assistant(display).at(Utc::now()))?;
                debug!(round = %self.id, index, "assistant message started");
                self.assistant_index = Some(index);
                self.state = RoundState::Streaming;
                Ok(())
            }
        }
    }

    /// Ends the round after the body was fully read.
    ///
    /// Returns the assistant text that should be persisted, if any.
    pub fn complete(&mut self, store: &mut ConversationStore) -> Result<Option<String>, StoreError> {
        if self.state.is_terminal() {
            return Ok(None);
        }

        let buffer = self.buffer.finish();
        let display = self.frames.observe(buffer).map(str::to_owned);
        if let Some(display) = display {
            self.apply_display(store, display)?;
        }
        self.state = RoundState::Completed;

        if self.assistant_index.is_none() {
            return Ok(None);
        }
        Ok(self
            .frames
            .display()
            .filter(|text| !text.is_empty())
            .map(str::to_owned))
    }

    /// Ends the round with a transport fault, appending an error message.
    pub fn fail(&mut self, store: &mut ConversationStore, reason: &str) -> Result<usize, StoreError> {
        let reason = if reason.trim().is_empty() {
            DEFAULT_FAILURE
        } else {
            reason
        };
        self.state = RoundState::Failed;
        self.failure = Some(reason.to_string());
        let index = store.append(self.conversation, Message::error(reason).at(Utc::now()))?;
        self.error_index = Some(index);
        Ok(index)
    }

    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = RoundState::Cancelled;
        }
    }

    pub fn report(&self) -> RoundReport {
        let text = match self.state {
            RoundState::Failed => self.failure.clone(),
            _ => self.frames.display().map(str::to_owned),
        };
        RoundReport {
            round: self.id,
            conversation: self.conversation,
            state: self.state,
            assistant_index: self.assistant_index,
            text,
        }
    }
}
