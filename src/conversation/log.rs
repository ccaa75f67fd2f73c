//! Append-only conversation record
//!
//! The log is seeded with a single directive turn at construction and only
//! ever grows afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who contributed a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Spoken or typed by the person at the microphone
    Human,
    /// Generated by the remote reply service
    Machine,
    /// Fixed behavioral instruction seeded at startup
    Directive,
}

impl Role {
    /// Role name used by the reply endpoint
    pub fn wire_name(self) -> &'static str {
        match self {
            Role::Human => "user",
            Role::Machine => "assistant",
            Role::Directive => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Human => write!(f, "human"),
            Role::Machine => write!(f, "machine"),
            Role::Directive => write!(f, "directive"),
        }
    }
}

/// One immutable contribution to the dialogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// Entry of the ordered history sent to the reply endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

impl From<&Turn> for HistoryMessage {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role.wire_name().to_string(),
            content: turn.text.clone(),
        }
    }
}

/// Ordered, append-only record of turns
#[derive(Debug, Clone)]
pub struct ConversationLog {
    turns: Vec<Turn>,
}

impl ConversationLog {
    /// Create a log holding only the directive turn
    pub fn new(directive: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::new(Role::Directive, directive)],
        }
    }

    /// Append a human or machine turn and return it
    pub fn append(&mut self, role: Role, text: impl Into<String>) -> &Turn {
        debug_assert!(role != Role::Directive, "directive is seeded once");
        self.turns.push(Turn::new(role, text));
        &self.turns[self.turns.len() - 1]
    }

    /// All turns in creation order
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Find a turn by id
    pub fn get(&self, id: Uuid) -> Option<&Turn> {
        self.turns.iter().find(|t| t.id == id)
    }

    /// Ordered payload for a reply request
    pub fn history(&self) -> Vec<HistoryMessage> {
        self.turns.iter().map(HistoryMessage::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_with_directive() {
        let log = ConversationLog::new("be brief");
        assert_eq!(log.len(), 1);
        assert_eq!(log.turns()[0].role, Role::Directive);
        assert_eq!(log.turns()[0].text, "be brief");
    }

    #[test]
    fn test_append_preserves_order() {
        let mut log = ConversationLog::new("be brief");
        let first = log.append(Role::Human, "hello").id;
        let second = log.append(Role::Machine, "hi there").id;

        let roles: Vec<Role> = log.turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::Directive, Role::Human, Role::Machine]);
        assert_ne!(first, second);
        assert_eq!(log.get(second).map(|t| t.text.as_str()), Some("hi there"));
    }

    #[test]
    fn test_history_uses_wire_roles() {
        let mut log = ConversationLog::new("be brief");
        log.append(Role::Human, "what is symbiosis");
        log.append(Role::Machine, "living together");

        let history = log.history();
        let roles: Vec<&str> = history.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
        assert_eq!(history[1].content, "what is symbiosis");
    }

    #[test]
    fn test_unknown_id_lookup() {
        let log = ConversationLog::new("be brief");
        assert!(log.get(Uuid::new_v4()).is_none());
    }
}
