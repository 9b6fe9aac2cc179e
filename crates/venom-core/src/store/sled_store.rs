//! Sled-backed store: one tree per collection, JSON documents keyed by id.

use super::{new_document_id, sort_newest_first, ConversationStore, ProfileStore};
use crate::error::PersistenceError;
use crate::types::{Conversation, ConversationPatch, NewConversation, UserProfile};
use async_trait::async_trait;
use sled::{Db, Tree};
use std::path::Path;
use tracing::debug;

const DEFAULT_STORE_PATH: &str = "./data/venom_store";
const CONVERSATIONS_TREE: &str = "conversations";
const PROFILES_TREE: &str = "profiles";

pub struct SledStore {
    db: Db,
    conversations: Tree,
    profiles: Tree,
}

impl SledStore {
    /// Opens or creates the store at `./data/venom_store`.
    pub fn new() -> Result<Self, PersistenceError> {
        Self::open_path(DEFAULT_STORE_PATH)
    }

    /// Opens or creates the store at the given path.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let db = sled::open(path)?;
        let conversations = db.open_tree(CONVERSATIONS_TREE)?;
        let profiles = db.open_tree(PROFILES_TREE)?;
        Ok(Self {
            db,
            conversations,
            profiles,
        })
    }

    /// Flushes dirty pages to disk.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        self.db.flush_async().await?;
        Ok(())
    }

    fn read_conversation(&self, id: &str) -> Result<Option<Conversation>, PersistenceError> {
        match self.conversations.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_conversation(&self, conversation: &Conversation) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec(conversation)?;
        self.conversations.insert(conversation.id.as_bytes(), bytes)?;
        Ok(())
    }
}

fn patched(bytes: &[u8], patch: &ConversationPatch) -> Result<Vec<u8>, PersistenceError> {
    let mut conversation: Conversation = serde_json::from_slice(bytes)?;
    conversation.apply(patch.clone());
    Ok(serde_json::to_vec(&conversation)?)
}

#[async_trait]
impl ConversationStore for SledStore {
    async fn create_conversation(&self, data: NewConversation) -> Result<String, PersistenceError> {
        let id = new_document_id();
        let conversation = data.into_conversation(id.clone());
        self.write_conversation(&conversation)?;
        debug!(conversation_id = %id, "conversation created");
        Ok(id)
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation, PersistenceError> {
        self.read_conversation(id)?
            .ok_or_else(|| PersistenceError::NotFound(format!("conversation {}", id)))
    }

    async fn update_conversation(
        &self,
        id: &str,
        patch: ConversationPatch,
    ) -> Result<(), PersistenceError> {
        // sled may run the closure more than once under contention; each run
        // starts from the latest stored document.
        let mut failure = None;
        let updated = self.conversations.update_and_fetch(id.as_bytes(), |old| {
            failure = None;
            let old = old?;
            match patched(old, &patch) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    failure = Some(e);
                    Some(old.to_vec())
                }
            }
        })?;
        if let Some(e) = failure {
            return Err(e);
        }
        match updated {
            Some(_) => Ok(()),
            None => Err(PersistenceError::NotFound(format!("conversation {}", id))),
        }
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), PersistenceError> {
        self.conversations.remove(id.as_bytes())?;
        debug!(conversation_id = %id, "conversation deleted");
        Ok(())
    }

    async fn get_user_conversations(
        &self,
        user_id: &str,
    ) -> Result<Vec<Conversation>, PersistenceError> {
        let mut out = Vec::new();
        for item in self.conversations.iter() {
            let (_, bytes) = item?;
            let conversation: Conversation = serde_json::from_slice(&bytes)?;
            if conversation.user_id == user_id {
                out.push(conversation);
            }
        }
        sort_newest_first(&mut out);
        Ok(out)
    }
}

#[async_trait]
impl ProfileStore for SledStore {
    async fn create_or_update_user(
        &self,
        user_id: &str,
        profile: UserProfile,
    ) -> Result<(), PersistenceError> {
        let merged = match self.profiles.get(user_id.as_bytes())? {
            Some(bytes) => {
                let mut existing: UserProfile = serde_json::from_slice(&bytes)?;
                existing.merge(profile);
                existing
            }
            None => profile,
        };
        self.profiles
            .insert(user_id.as_bytes(), serde_json::to_vec(&merged)?)?;
        Ok(())
    }

    async fn get_user_profile(&self, user_id: &str) -> Result<Option<UserProfile>, PersistenceError> {
        match self.profiles.get(user_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
