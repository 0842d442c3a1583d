//! FlowBot
//!
//! A host for Telegram bots built from pluggable extensions. Extensions expose
//! commands whose follow-up conversations are described as flows of guarded
//! steps; each conversation's position in its flow is kept in a durable
//! per-bot state store.

#![allow(non_snake_case)]

pub mod bot;
pub mod config;
pub mod extension;
pub mod extensions;
pub mod handlers;
pub mod services;
pub mod state;
pub mod utils;

// Re-export commonly used types
pub use config::Settings;
pub use utils::errors::{FlowBotError, Result};

// Re-export main components for easy access
pub use bot::{BotInstance, UpdateOutcome};
pub use extension::{ExtensionFactory, ExtensionIdentity, ExtensionRegistry};
pub use state::{FlowEngine, StateStore};
pub use utils::accounts::bot_account_id_from_token;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn info() -> String {
    format!("{} v{}", NAME, VERSION)
}
