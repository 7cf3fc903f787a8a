//! Context messages handed to the text generator, and the initial seed.

use serde::{Deserialize, Serialize};

use super::turn::{Speaker, Turn};

/// Role of a message in the assembled generation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl From<Speaker> for MessageRole {
    fn from(speaker: Speaker) -> Self {
        match speaker {
            Speaker::User => Self::User,
            Speaker::System => Self::Assistant,
        }
    }
}

/// One role-tagged message of generation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ContextMessage {
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Initial context supplied by the persistence collaborator at conversation
/// start. The engine never reads persisted history beyond this value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContextSeed {
    /// Background material, pinned for the whole conversation.
    pub system_context: Option<String>,

    /// Previously committed turns, oldest first.
    pub history: Vec<Turn>,
}
