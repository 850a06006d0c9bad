//! Conversation transcript
//!
//! Ordered, role-tagged message history. Insertion order is the
//! conversation order and is replayed verbatim into the template
//! renderer. Pure data; the session manager provides all serialization
//! of access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
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

/// One transcript entry. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Ordered transcript of one session. Cleared whenever the model is
/// closed or reloaded.
#[derive(Debug, Default, Clone)]
pub struct ConversationStore {
    messages: Vec<Message>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Role and content are set atomically; the store never holds a
    /// partially-constructed message.
    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drops every message past `len`. Used to roll a failed turn back.
    pub fn truncate(&mut self, len: usize) {
        self.messages.truncate(len);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_preserves_order() {
        let mut store = ConversationStore::new();
        store.append(Role::System, "be brief");
        store.append(Role::User, "hi");
        store.append(Role::Assistant, "hello");

        let roles: Vec<Role> = store.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(store.messages()[2].content, "hello");
    }

    #[test]
    fn truncate_rolls_back_to_marker() {
        let mut store = ConversationStore::new();
        store.append(Role::System, "s");
        let marker = store.len();
        store.append(Role::User, "u");
        store.append(Role::Assistant, "a");

        store.truncate(marker);
        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].role, Role::System);
    }

    #[test]
    fn clear_releases_everything() {
        let mut store = ConversationStore::new();
        store.append(Role::User, "u");
        store.clear();
        assert!(store.is_empty());
    }
}
