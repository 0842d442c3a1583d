//! Bot handlers module
//!
//! Translates incoming Telegram updates into flow updates and routes them to
//! the bot instance that received them.

pub mod messages;

pub use messages::{handle_message, to_update};
