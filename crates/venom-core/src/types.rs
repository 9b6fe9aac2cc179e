//! Conversation data model shared by the stores, the chat session and the voice pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload kind of a message. Spoken input is stored as its transcript text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Text,
}

/// One appended entry of a conversation. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub content_type: ContentType,
    pub timestamp: DateTime<Utc>,
}

/// Message contents before the chat session assigns an id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub content_type: ContentType,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            content_type: ContentType::Text,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            content_type: ContentType::Text,
        }
    }
}

/// `{role, content}` pair handed to the chat-completion service as prior context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for HistoryMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// A conversation document. `messages` is in conversational order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Applies the fields present in `patch`.
    pub fn apply(&mut self, patch: ConversationPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(messages) = patch.messages {
            self.messages = messages;
        }
    }
}

/// Data for a conversation the store has not assigned an id to yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl NewConversation {
    pub fn new(user_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            title: title.into(),
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    pub fn into_conversation(self, id: String) -> Conversation {
        Conversation {
            id,
            user_id: self.user_id,
            title: self.title,
            created_at: self.created_at,
            messages: self.messages,
        }
    }
}

/// Partial update of a conversation document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationPatch {
    pub title: Option<String>,
    pub messages: Option<Vec<Message>>,
}

impl ConversationPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            messages: None,
        }
    }

    pub fn messages(messages: Vec<Message>) -> Self {
        Self {
            title: None,
            messages: Some(messages),
        }
    }
}

/// Profile record kept next to the auth identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Free-form fields supplied at sign-up or by later profile updates.
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl UserProfile {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            display_name: None,
            created_at: Utc::now(),
            updated_at: None,
            extra: BTreeMap::new(),
        }
    }

    /// Merges `incoming` over `self`. The original creation time is kept.
    pub fn merge(&mut self, incoming: UserProfile) {
        if !incoming.email.is_empty() {
            self.email = incoming.email;
        }
        if incoming.display_name.is_some() {
            self.display_name = incoming.display_name;
        }
        if incoming.updated_at.is_some() {
            self.updated_at = incoming.updated_at;
        }
        self.extra.extend(incoming.extra);
    }
}

/// Changes requested through `AuthSession::update_profile`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Identity returned by the auth backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Hands out millisecond-timestamp message ids that strictly increase within a session.
#[derive(Debug, Default)]
pub struct MessageIdGenerator {
    last: AtomicI64,
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for a message created at `now`.
    pub fn next_id(&self, now: DateTime<Utc>) -> String {
        let millis = now.timestamp_millis();
        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            let next = if millis > prev { millis } else { prev + 1 };
            match self
                .last
                .compare_exchange(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next.to_string(),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Raises the floor so ids continue after messages loaded from the store.
    pub fn observe(&self, id: &str) {
        if let Ok(value) = id.parse::<i64>() {
            self.last.fetch_max(value, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ids_increase_within_the_same_millisecond() {
        let ids = MessageIdGenerator::new();
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let a: i64 = ids.next_id(now).parse().unwrap();
        let b: i64 = ids.next_id(now).parse().unwrap();
        let c: i64 = ids.next_id(now).parse().unwrap();
        assert_eq!(a, 1_700_000_000_000);
        assert!(b > a && c > b);
    }

    #[test]
    fn observed_ids_raise_the_floor() {
        let ids = MessageIdGenerator::new();
        ids.observe("1700000000500");
        ids.observe("not-a-number");
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        assert_eq!(ids.next_id(now), "1700000000501");
    }

    #[test]
    fn message_serializes_with_lowercase_role() {
        let msg = Message {
            id: "1".into(),
            role: Role::Assistant,
            content: "hi".into(),
            content_type: ContentType::Text,
            timestamp: Utc.timestamp_millis_opt(0).unwrap(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["contentType"], "text");
    }

    #[test]
    fn profile_merge_keeps_created_at_and_extends_extra() {
        let mut base = UserProfile::new("a@example.com");
        let created = base.created_at;
        base.extra.insert("plan".into(), serde_json::json!("free"));

        let mut incoming = UserProfile::new("");
        incoming.display_name = Some("Ari".into());
        incoming.extra.insert("lang".into(), serde_json::json!("ko"));
        base.merge(incoming);

        assert_eq!(base.email, "a@example.com");
        assert_eq!(base.display_name.as_deref(), Some("Ari"));
        assert_eq!(base.created_at, created);
        assert_eq!(base.extra.len(), 2);
    }

    #[test]
    fn patch_applies_only_present_fields() {
        let mut conv = NewConversation::new("u1", "old").into_conversation("c1".into());
        conv.apply(ConversationPatch::title("new"));
        assert_eq!(conv.title, "new");
        assert!(conv.messages.is_empty());
    }
}
