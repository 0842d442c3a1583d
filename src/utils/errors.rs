//! Error handling for FlowBot
//!
//! This module defines the main error type used throughout the bot host
//! and provides a unified error handling strategy.

use thiserror::Error;

/// Main error type for the FlowBot host
#[derive(Error, Debug)]
pub enum FlowBotError {
    #[error("Invalid bot credential: {0}")]
    InvalidCredential(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration loading error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Invalid flow `{flow}`: {reason}")]
    InvalidFlow { flow: String, reason: String },

    #[error("Step action failed in `{step}`: {message}")]
    Action { step: String, message: String },

    #[error("Extension `{extension}` failed to load: {message}")]
    Extension { extension: String, message: String },

    #[error("State storage error: {0}")]
    Storage(String),

    #[error("Telegram API error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for FlowBot operations
pub type Result<T> = std::result::Result<T, FlowBotError>;

impl FlowBotError {
    /// Shorthand used by step handlers to fail an action
    pub fn action(step: impl Into<String>, message: impl Into<String>) -> Self {
        FlowBotError::Action {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            FlowBotError::InvalidCredential(_) => false,
            FlowBotError::Config(_) => false,
            FlowBotError::ConfigLoad(_) => false,
            FlowBotError::InvalidFlow { .. } => false,
            FlowBotError::Action { .. } => true,
            FlowBotError::Extension { .. } => false,
            FlowBotError::Storage(_) => true,
            FlowBotError::Telegram(_) => true,
            FlowBotError::Redis(_) => true,
            FlowBotError::Http(_) => true,
            FlowBotError::Serialization(_) => false,
            FlowBotError::Io(_) => true,
            FlowBotError::UrlParse(_) => false,
            FlowBotError::Metrics(_) => false,
            FlowBotError::InvalidInput(_) => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            FlowBotError::InvalidCredential(_) => ErrorSeverity::Critical,
            FlowBotError::Config(_) => ErrorSeverity::Critical,
            FlowBotError::ConfigLoad(_) => ErrorSeverity::Critical,
            FlowBotError::InvalidFlow { .. } => ErrorSeverity::Critical,
            FlowBotError::Extension { .. } => ErrorSeverity::Warning,
            FlowBotError::InvalidInput(_) => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSeverity::Info => write!(f, "INFO"),
            ErrorSeverity::Warning => write!(f, "WARN"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}
