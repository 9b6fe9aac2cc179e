//! Conversation and profile persistence.
//!
//! The chat session only talks to the [`ConversationStore`] trait; [`SledStore`]
//! keeps documents on disk and [`MemoryStore`] keeps them in a `DashMap` for
//! tests and ephemeral sessions.

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use crate::error::PersistenceError;
use crate::types::{Conversation, ConversationPatch, NewConversation, UserProfile};
use async_trait::async_trait;

/// Conversation documents holding an ordered message list.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Stores a new conversation and returns its id.
    async fn create_conversation(&self, data: NewConversation) -> Result<String, PersistenceError>;

    /// Loads a conversation wholesale, messages included.
    async fn get_conversation(&self, id: &str) -> Result<Conversation, PersistenceError>;

    async fn update_conversation(
        &self,
        id: &str,
        patch: ConversationPatch,
    ) -> Result<(), PersistenceError>;

    async fn delete_conversation(&self, id: &str) -> Result<(), PersistenceError>;

    /// All conversations owned by `user_id`, newest first.
    async fn get_user_conversations(
        &self,
        user_id: &str,
    ) -> Result<Vec<Conversation>, PersistenceError>;
}

/// Profile records keyed by user id.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Creates the profile or merges `profile` into the existing one.
    async fn create_or_update_user(
        &self,
        user_id: &str,
        profile: UserProfile,
    ) -> Result<(), PersistenceError>;

    async fn get_user_profile(&self, user_id: &str) -> Result<Option<UserProfile>, PersistenceError>;
}

/// Newest first; ties broken by id so listings are stable.
pub(crate) fn sort_newest_first(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

pub(crate) fn new_document_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
