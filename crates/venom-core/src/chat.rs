//! The conversation working set: the user's conversation list, the selected
//! conversation and its messages, plus the last store error.
//!
//! Message appends are local-first: the message is added to the in-memory
//! conversation, then the whole ordered list is written back. A failed write is
//! recorded in [`ChatSession::error`] and the local message is kept.

use crate::error::{ChatError, PersistenceError};
use crate::store::ConversationStore;
use crate::types::{
    Conversation, ConversationPatch, HistoryMessage, Message, MessageIdGenerator, NewConversation,
    NewMessage,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Title given to conversations created without one.
pub const DEFAULT_CONVERSATION_TITLE: &str = "새 대화";

#[derive(Debug, Default)]
struct ChatState {
    conversations: Vec<Conversation>,
    current: Option<Conversation>,
    is_loading: bool,
    error: Option<String>,
}

pub struct ChatSession {
    store: Arc<dyn ConversationStore>,
    state: RwLock<ChatState>,
    /// Serializes append+persist so an older snapshot never lands after a newer one.
    append_lock: Mutex<()>,
    ids: MessageIdGenerator,
}

impl ChatSession {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self {
            store,
            state: RwLock::new(ChatState::default()),
            append_lock: Mutex::new(()),
            ids: MessageIdGenerator::new(),
        }
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.state.read().await.conversations.clone()
    }

    pub async fn current(&self) -> Option<Conversation> {
        self.state.read().await.current.clone()
    }

    pub async fn current_id(&self) -> Option<String> {
        self.state.read().await.current.as_ref().map(|c| c.id.clone())
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.state
            .read()
            .await
            .current
            .as_ref()
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.is_loading
    }

    /// Last store error, if any operation failed since it was cleared.
    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    pub async fn clear_error(&self) {
        self.state.write().await.error = None;
    }

    /// The last `limit` messages of the current conversation as model context.
    pub async fn history(&self, limit: usize) -> Vec<HistoryMessage> {
        let state = self.state.read().await;
        let Some(current) = state.current.as_ref() else {
            return Vec::new();
        };
        let skip = current.messages.len().saturating_sub(limit);
        current.messages[skip..].iter().map(HistoryMessage::from).collect()
    }

    /// Loads the user's conversations, newest first.
    pub async fn fetch_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, ChatError> {
        self.state.write().await.is_loading = true;
        let result = self.store.get_user_conversations(user_id).await;
        let mut state = self.state.write().await;
        state.is_loading = false;
        match result {
            Ok(list) => {
                debug!(user_id, count = list.len(), "conversations fetched");
                state.conversations = list.clone();
                Ok(list)
            }
            Err(e) => Err(Self::record(&mut state, e)),
        }
    }

    /// Makes `id` the current conversation, loading it wholesale from the store.
    pub async fn select_conversation(&self, id: &str) -> Result<Conversation, ChatError> {
        self.state.write().await.is_loading = true;
        let result = self.store.get_conversation(id).await;
        let mut state = self.state.write().await;
        state.is_loading = false;
        match result {
            Ok(conversation) => {
                for message in &conversation.messages {
                    self.ids.observe(&message.id);
                }
                info!(conversation_id = %conversation.id, messages = conversation.messages.len(), "💬 Conversation selected");
                state.current = Some(conversation.clone());
                Ok(conversation)
            }
            Err(e) => Err(Self::record(&mut state, e)),
        }
    }

    /// Creates a conversation, prepends it to the list and makes it current.
    pub async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation, ChatError> {
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_CONVERSATION_TITLE);
        let data = NewConversation::new(user_id, title);
        let result = self.store.create_conversation(data.clone()).await;
        let mut state = self.state.write().await;
        match result {
            Ok(id) => {
                let conversation = data.into_conversation(id);
                info!(conversation_id = %conversation.id, title = %conversation.title, "🆕 Conversation created");
                state.conversations.insert(0, conversation.clone());
                state.current = Some(conversation.clone());
                Ok(conversation)
            }
            Err(e) => Err(Self::record(&mut state, e)),
        }
    }

    /// Selects the newest conversation, or creates one when the user has none.
    pub async fn open_or_create(&self, user_id: &str) -> Result<Conversation, ChatError> {
        let list = self.fetch_conversations(user_id).await?;
        match list.first() {
            Some(newest) => self.select_conversation(&newest.id).await,
            None => self.create_conversation(user_id, None).await,
        }
    }

    /// Appends to the current conversation, whatever it is.
    pub async fn append_message(&self, message: NewMessage) -> Result<Message, ChatError> {
        self.append_inner(None, message).await
    }

    /// Appends only if `conversation_id` is still the current conversation.
    pub async fn append_to(
        &self,
        conversation_id: &str,
        message: NewMessage,
    ) -> Result<Message, ChatError> {
        self.append_inner(Some(conversation_id), message).await
    }

    async fn append_inner(
        &self,
        expected: Option<&str>,
        message: NewMessage,
    ) -> Result<Message, ChatError> {
        let _order = self.append_lock.lock().await;

        let (conversation_id, appended, snapshot) = {
            let mut state = self.state.write().await;
            let current = state.current.as_mut().ok_or(ChatError::NoConversation)?;
            if let Some(expected) = expected {
                if current.id != expected {
                    return Err(ChatError::NotCurrent(expected.to_string()));
                }
            }
            let now = Utc::now();
            let appended = Message {
                id: self.ids.next_id(now),
                role: message.role,
                content: message.content,
                content_type: message.content_type,
                timestamp: now,
            };
            current.messages.push(appended.clone());
            (current.id.clone(), appended, current.messages.clone())
        };

        debug!(conversation_id = %conversation_id, role = %appended.role, count = snapshot.len(), "message appended");
        match self
            .store
            .update_conversation(&conversation_id, ConversationPatch::messages(snapshot))
            .await
        {
            Ok(()) => Ok(appended),
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "message kept locally but not persisted");
                Err(Self::record(&mut *self.state.write().await, e))
            }
        }
    }

    /// Renames the current conversation.
    pub async fn rename_current(&self, title: &str) -> Result<(), ChatError> {
        let id = self.current_id().await.ok_or(ChatError::NoConversation)?;
        let result = self
            .store
            .update_conversation(&id, ConversationPatch::title(title))
            .await;
        let mut state = self.state.write().await;
        match result {
            Ok(()) => {
                if let Some(current) = state.current.as_mut().filter(|c| c.id == id) {
                    current.title = title.to_string();
                }
                if let Some(entry) = state.conversations.iter_mut().find(|c| c.id == id) {
                    entry.title = title.to_string();
                }
                Ok(())
            }
            Err(e) => Err(Self::record(&mut state, e)),
        }
    }

    /// Deletes the current conversation and clears the selection.
    pub async fn delete_current(&self) -> Result<(), ChatError> {
        let id = self.current_id().await.ok_or(ChatError::NoConversation)?;
        let result = self.store.delete_conversation(&id).await;
        let mut state = self.state.write().await;
        match result {
            Ok(()) => {
                info!(conversation_id = %id, "🗑️ Conversation deleted");
                state.conversations.retain(|c| c.id != id);
                state.current = None;
                Ok(())
            }
            Err(e) => Err(Self::record(&mut state, e)),
        }
    }

    /// Drops the whole working set (sign-out).
    pub async fn reset(&self) {
        *self.state.write().await = ChatState::default();
    }

    fn record(state: &mut ChatState, err: PersistenceError) -> ChatError {
        state.error = Some(err.to_string());
        ChatError::Persistence(err)
    }
}
