//! UI-agnostic conversation state types
//!
//! This module contains the data structures a chat view renders. They don't
//! depend on any specific UI framework; the terminal front end reads them
//! through [`crate::ChatSession::state`].

use serde::{Deserialize, Serialize};

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self {
            role: Role::Bot,
            content: content.into(),
        }
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

/// Everything a chat view needs to draw itself.
///
/// Messages are append-only: once pushed they are never reordered or removed.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
    /// True while a reply is being awaited. Input is refused while set.
    pub pending: bool,
    pub last_error: Option<String>,
    /// True while speech capture is running
    pub voice_active: bool,
    /// Drives the "thinking" blob animation
    pub animating: bool,
    /// Reply text assembled so far for the in-flight request
    pub assembly: Option<String>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a conversation with a single bot greeting
    pub fn with_greeting(greeting: &str) -> Self {
        let mut state = Self::new();
        state.push(Message::bot(greeting));
        state
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_seeds_one_bot_message() {
        let state = ConversationState::with_greeting("Hello, I'm Jarvis.");
        assert_eq!(state.messages(), &[Message::bot("Hello, I'm Jarvis.")]);
        assert!(!state.pending);
        assert!(state.last_error.is_none());
    }

    #[test]
    fn test_push_keeps_insertion_order() {
        let mut state = ConversationState::new();
        state.push(Message::user("one"));
        state.push(Message::bot("two"));
        state.push(Message::user("three"));
        let contents: Vec<&str> = state.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::bot("hi")).unwrap();
        assert_eq!(json, r#"{"role":"bot","content":"hi"}"#);
    }
}
