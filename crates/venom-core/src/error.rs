//! Error types for conversation storage, authentication and the chat session.

use thiserror::Error;

/// Store read/write failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<sled::Error> for PersistenceError {
    fn from(err: sled::Error) -> Self {
        PersistenceError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Serialization(err.to_string())
    }
}

/// Authentication failure reported by an [`crate::auth::AuthBackend`] or the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Auth network error: {0}")]
    Network(String),

    #[error("Auth request rejected: {0}")]
    Rejected(String),

    #[error("Auth configuration error: {0}")]
    Configuration(String),

    #[error("No user is signed in")]
    NotSignedIn,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Failure of a [`crate::chat::ChatSession`] operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("No conversation is selected")]
    NoConversation,

    /// The target conversation is no longer the current one.
    #[error("Conversation {0} is no longer current")]
    NotCurrent(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
