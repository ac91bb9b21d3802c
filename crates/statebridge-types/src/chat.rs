// ABOUTME: Chat-session data carried through the bridge as typed payloads
// ABOUTME: Pure data structures shared by the legacy and modern sides

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a chat session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum MessageRole {
    #[default]
    User,
    Assistant,
    System,
}

/// A single message appended to a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub session_id: SessionId,
    pub message_id: String,
    #[serde(default)]
    pub role: MessageRole,
    pub content: String,
}

/// Session-level attribute change (selection or rename)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub active: bool,
}

/// Unsent composer text for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftChange {
    pub session_id: SessionId,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_defaults_to_user() {
        let message: ChatMessage = serde_json::from_str(
            r#"{"session_id":"s1","message_id":"m1","content":"hello"}"#,
        )
        .unwrap();
        assert_eq!(message.role, MessageRole::User);
        assert_eq!(message.session_id, SessionId::new("s1"));
    }

    #[test]
    fn test_session_update_skips_missing_title() {
        let update = SessionUpdate {
            session_id: "s1".into(),
            title: None,
            active: true,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert!(json.get("title").is_none());
        assert_eq!(json["active"], true);
    }
}
