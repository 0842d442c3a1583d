//! Conversation context
//!
//! Inbound updates, the context handed to step actions, and the effects
//! actions produce.

use serde::{Deserialize, Serialize};

/// One inbound conversational event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    /// Chat the update belongs to; flow state is keyed by it
    pub conversation_id: i64,
    /// User who sent the update
    pub sender_id: i64,
    pub text: Option<String>,
    pub sender_username: Option<String>,
    pub language_code: Option<String>,
}

impl Update {
    /// Text update from a sender in a conversation
    pub fn text(conversation_id: i64, sender_id: i64, text: impl Into<String>) -> Self {
        Self {
            conversation_id,
            sender_id,
            text: Some(text.into()),
            sender_username: None,
            language_code: None,
        }
    }

    /// Update without text (stickers, photos, service messages)
    pub fn without_text(conversation_id: i64, sender_id: i64) -> Self {
        Self {
            conversation_id,
            sender_id,
            text: None,
            sender_username: None,
            language_code: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.sender_username = Some(username.into());
        self
    }

    pub fn has_text(&self) -> bool {
        self.text.is_some()
    }

    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

/// Observable output of an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    SendText { conversation_id: i64, text: String },
}

impl Effect {
    pub fn send_text(conversation_id: i64, text: impl Into<String>) -> Self {
        Effect::SendText {
            conversation_id,
            text: text.into(),
        }
    }
}

/// What an action gets to see about the bot it runs in
#[derive(Debug, Clone)]
pub struct FlowContext {
    pub bot_name: String,
    pub bot_account_id: i64,
    pub conversation_id: i64,
    /// `flow/step` being executed, `None` for a root action
    pub step: Option<String>,
}

impl FlowContext {
    /// Reply into the conversation being handled
    pub fn reply(&self, text: impl Into<String>) -> Effect {
        Effect::send_text(self.conversation_id, text)
    }

    /// Label used in logs and errors
    pub fn location(&self) -> &str {
        self.step.as_deref().unwrap_or("<root>")
    }
}
