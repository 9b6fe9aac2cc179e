//! # Venom Core
//!
//! Conversation data model and the collaborators the voice pipeline leans on:
//! conversation persistence, authentication, and the [`ChatSession`] working set.

pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use auth::{AuthBackend, AuthOutcome, AuthSession, FirebaseAuth, Subscription};
pub use chat::{ChatSession, DEFAULT_CONVERSATION_TITLE};
pub use config::{env_opt_string, CoreConfig};
pub use error::{AuthError, ChatError, PersistenceError};
pub use store::{ConversationStore, MemoryStore, ProfileStore, SledStore};
pub use types::{
    AuthUser, ContentType, Conversation, ConversationPatch, HistoryMessage, Message,
    MessageIdGenerator, NewConversation, NewMessage, ProfileUpdate, Role, UserProfile,
};
