//! Conversation store.
//!
//! The store is the single owner of every conversation and of the current
//! selection. Everything else mutates it through id-keyed operations, and the
//! persistence hook sees the full list after each mutation.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::model::{Conversation, Message, MessagePatch, PersistedState};
use crate::options::{HistoryRetention, StoreOptions};

/// Errors from id-keyed store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("message {message_id} not found in conversation {conversation_id}")]
    MessageNotFound {
        conversation_id: String,
        message_id: String,
    },
}

/// Persistence hook, called with all conversations after every mutation.
pub type ChangeListener = Box<dyn Fn(&[Conversation]) + Send + Sync>;

/// Store shared between the turn controller and its stream sessions.
pub type SharedStore = Arc<Mutex<ConversationStore>>;

/// Ordered collection of conversations plus the current selection.
#[derive(Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    current_id: Option<String>,
    options: StoreOptions,
    on_change: Option<ChangeListener>,
    evicted: Vec<String>,
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("conversations", &self.conversations.len())
            .field("current_id", &self.current_id)
            .field("options", &self.options)
            .finish()
    }
}

impl ConversationStore {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    /// Restore from persisted state. A selection pointing at a missing
    /// conversation is dropped, and no restored message is left streaming
    /// since no session survives a reload.
    pub fn load(state: PersistedState, options: StoreOptions) -> Self {
        let current_id = state
            .current_id
            .filter(|id| state.conversations.iter().any(|c| &c.id == id));

        let mut conversations = state.conversations;
        for message in conversations.iter_mut().flat_map(|c| c.messages.iter_mut()) {
            message.is_streaming = false;
        }

        let mut store = Self {
            conversations,
            current_id,
            options,
            ..Default::default()
        };
        store.enforce_retention();
        store
    }

    /// Register the persistence hook.
    pub fn on_change(mut self, listener: impl Fn(&[Conversation]) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Box::new(listener));
        self
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    /// Snapshot in the shape the persistence collaborator stores.
    pub fn snapshot(&self) -> PersistedState {
        PersistedState {
            conversations: self.conversations.clone(),
            current_id: self.current_id.clone(),
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current_id.as_deref()
    }

    pub fn current(&self) -> Option<&Conversation> {
        self.current_id.as_deref().and_then(|id| self.get(id))
    }

    /// Create a conversation, select it, and return its id.
    ///
    /// Conversations dropped by the retention limit are reported through
    /// [`Self::take_evicted`].
    pub fn create_conversation(&mut self, title: Option<String>) -> String {
        let conversation = Conversation::new(title);
        let id = conversation.id.clone();
        debug!("Creating conversation {}", id);

        self.conversations.push(conversation);
        self.current_id = Some(id.clone());
        let evicted = self.enforce_retention();
        self.evicted.extend(evicted);
        self.notify();
        id
    }

    /// Ids of conversations dropped by the retention limit since the last call.
    pub fn take_evicted(&mut self) -> Vec<String> {
        std::mem::take(&mut self.evicted)
    }

    /// Select an existing conversation.
    pub fn select(&mut self, id: &str) -> Result<(), StoreError> {
        if self.get(id).is_none() {
            return Err(StoreError::ConversationNotFound(id.to_string()));
        }
        self.current_id = Some(id.to_string());
        self.notify();
        Ok(())
    }

    /// Drop the selection without deleting anything, so the next turn starts
    /// a new conversation.
    pub fn clear_selection(&mut self) {
        self.current_id = None;
        self.notify();
    }

    pub fn set_title(&mut self, id: &str, title: impl Into<String>) -> Result<(), StoreError> {
        let conversation = self.get_mut(id)?;
        conversation.title = Some(title.into());
        conversation.touch();
        self.notify();
        Ok(())
    }

    /// Append a message to the end of a conversation.
    pub fn append_message(&mut self, conversation_id: &str, message: Message) -> Result<(), StoreError> {
        let conversation = self.get_mut(conversation_id)?;
        conversation.messages.push(message);
        conversation.touch();
        self.notify();
        Ok(())
    }

    /// Patch a message in place, looked up by conversation and message id.
    pub fn update_message_by_id(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        patch: &MessagePatch,
    ) -> Result<(), StoreError> {
        let conversation = self.get_mut(conversation_id)?;
        let message = conversation
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| StoreError::MessageNotFound {
                conversation_id: conversation_id.to_string(),
                message_id: message_id.to_string(),
            })?;

        message.apply(patch);
        conversation.touch();
        self.notify();
        Ok(())
    }

    /// Remove a conversation. Removing the selected one clears the selection.
    pub fn delete(&mut self, id: &str) -> Result<Conversation, StoreError> {
        let index = self
            .conversations
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| StoreError::ConversationNotFound(id.to_string()))?;

        let removed = self.conversations.remove(index);
        if self.current_id.as_deref() == Some(id) {
            self.current_id = None;
        }
        self.notify();
        Ok(removed)
    }

    /// Remove every conversation and the selection.
    pub fn clear_all(&mut self) {
        self.conversations.clear();
        self.current_id = None;
        self.notify();
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Conversation, StoreError> {
        self.conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::ConversationNotFound(id.to_string()))
    }

    fn enforce_retention(&mut self) -> Vec<String> {
        let mut evicted = Vec::new();
        let HistoryRetention::Limit(limit) = self.options.retention else {
            return evicted;
        };
        let limit = limit.max(1);

        while self.conversations.len() > limit {
            let Some(index) = self
                .conversations
                .iter()
                .position(|c| Some(c.id.as_str()) != self.current_id.as_deref())
            else {
                break;
            };
            let dropped = self.conversations.remove(index);
            debug!("Retention limit reached, dropping conversation {}", dropped.id);
            evicted.push(dropped.id);
        }
        evicted
    }

    fn notify(&self) {
        if let Some(listener) = &self.on_change {
            listener(&self.conversations);
        }
    }
}
