//! In-memory store on `DashMap`. Nothing survives the process.

use super::{new_document_id, sort_newest_first, ConversationStore, ProfileStore};
use crate::error::PersistenceError;
use crate::types::{Conversation, ConversationPatch, NewConversation, UserProfile};
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Default)]
pub struct MemoryStore {
    conversations: DashMap<String, Conversation>,
    profiles: DashMap<String, UserProfile>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_conversation(&self, data: NewConversation) -> Result<String, PersistenceError> {
        let id = new_document_id();
        self.conversations
            .insert(id.clone(), data.into_conversation(id.clone()));
        Ok(id)
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation, PersistenceError> {
        self.conversations
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PersistenceError::NotFound(format!("conversation {}", id)))
    }

    async fn update_conversation(
        &self,
        id: &str,
        patch: ConversationPatch,
    ) -> Result<(), PersistenceError> {
        let mut entry = self
            .conversations
            .get_mut(id)
            .ok_or_else(|| PersistenceError::NotFound(format!("conversation {}", id)))?;
        entry.apply(patch);
        Ok(())
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), PersistenceError> {
        self.conversations.remove(id);
        Ok(())
    }

    async fn get_user_conversations(
        &self,
        user_id: &str,
    ) -> Result<Vec<Conversation>, PersistenceError> {
        let mut out: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        sort_newest_first(&mut out);
        Ok(out)
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn create_or_update_user(
        &self,
        user_id: &str,
        profile: UserProfile,
    ) -> Result<(), PersistenceError> {
        match self.profiles.get_mut(user_id) {
            Some(mut existing) => existing.merge(profile),
            None => {
                self.profiles.insert(user_id.to_string(), profile);
            }
        }
        Ok(())
    }

    async fn get_user_profile(&self, user_id: &str) -> Result<Option<UserProfile>, PersistenceError> {
        Ok(self.profiles.get(user_id).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn user_conversations_are_newest_first_and_scoped() {
        let store = MemoryStore::new();
        let base = Utc::now();
        for (offset, user) in [(0, "u1"), (5, "u1"), (3, "u2"), (9, "u1")] {
            let mut data = NewConversation::new(user, format!("t{}", offset));
            data.created_at = base + Duration::seconds(offset);
            store.create_conversation(data).await.unwrap();
        }

        let list = store.get_user_conversations("u1").await.unwrap();
        let titles: Vec<_> = list.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["t9", "t5", "t0"]);
    }

    #[tokio::test]
    async fn update_of_missing_conversation_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update_conversation("nope", ConversationPatch::title("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound(_)));
    }
}
