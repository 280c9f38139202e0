//! Conversation memory for one session.

use serde::{Deserialize, Serialize};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
}

/// Append-only conversation transcript, cleared only by an explicit reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMemory {
    messages: Vec<Message>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user_message(&mut self, text: impl Into<String>) {
        self.messages.push(Message { role: Role::User, text: text.into() });
    }

    pub fn add_assistant_message(&mut self, text: impl Into<String>) {
        self.messages.push(Message { role: Role::Assistant, text: text.into() });
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Render the transcript as `User: ...` / `Assistant: ...` lines.
    pub fn render(&self) -> String {
        self.messages
            .iter()
            .map(|m| match m.role {
                Role::User => format!("User: {}", m.text),
                Role::Assistant => format!("Assistant: {}", m.text),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
