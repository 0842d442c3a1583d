//! Message handlers module
//!
//! Handles incoming messages for one bot instance

use std::sync::Arc;

use teloxide::types::Message;
use tracing::{debug, error};

use crate::bot::{BotInstance, UpdateOutcome};
use crate::state::Update;

pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Flow update for a Telegram message.
///
/// Messages without a sender (channel posts) are attributed to the chat.
pub fn to_update(msg: &Message) -> Update {
    let conversation_id = msg.chat.id.0;
    let sender = msg.from.as_ref();

    Update {
        conversation_id,
        sender_id: sender.map(|user| user.id.0 as i64).unwrap_or(conversation_id),
        text: msg.text().map(str::to_string),
        sender_username: sender.and_then(|user| user.username.clone()),
        language_code: sender.and_then(|user| user.language_code.clone()),
    }
}

/// Handle any incoming message
pub async fn handle_message(msg: Message, bot: Arc<BotInstance>) -> HandlerResult {
    let update = to_update(&msg);
    debug!(bot = %bot.name(), conversation_id = update.conversation_id, sender_id = update.sender_id,
           has_text = update.has_text(), "Processing message");

    match bot.handle_update(&update).await {
        Ok(UpdateOutcome::Flow(dispatch)) if !dispatch.is_handled() => {
            debug!(bot = %bot.name(), conversation_id = update.conversation_id, "Message not handled by any flow");
        }
        Ok(outcome) => {
            debug!(bot = %bot.name(), conversation_id = update.conversation_id, outcome = ?outcome, "Message handled");
        }
        Err(e) => {
            error!(bot = %bot.name(), conversation_id = update.conversation_id, error = %e,
                   severity = %e.severity(), recoverable = e.is_recoverable(), "Failed to handle message");
        }
    }

    Ok(())
}
