//! Services module
//!
//! Outbound delivery of the effects produced by flows

pub mod telegram;

pub use telegram::{build_telegram_bot, TelegramSender};

use async_trait::async_trait;

use crate::utils::errors::Result;

/// Delivers text to a conversation
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, conversation_id: i64, text: &str) -> Result<()>;
}
