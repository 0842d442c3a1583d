//! Logging configuration and setup
//!
//! This module provides logging initialization and structured logging utilities
//! for the bot host.

use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;
use crate::utils::errors::{FlowBotError, Result};

/// Initialize logging based on configuration.
///
/// The returned guard must be kept alive for the file writer to flush.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.level)
        .map_err(|e| FlowBotError::Config(format!("Invalid log filter: {}", e)))?;

    let (file_layer, guard) = match &config.file_path {
        Some(path) => {
            let file_appender = tracing_appender::rolling::daily(path, "flowbot.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(non_blocking),
                ),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(file_layer)
        .try_init()
        .map_err(|e| FlowBotError::Config(format!("Logging already initialized: {}", e)))?;

    info!("Logging initialized with level: {}", config.level);
    Ok(guard)
}

/// Log a flow state transition
pub fn log_flow_transition(bot: &str, conversation_id: i64, from: Option<&str>, to: Option<&str>) {
    debug!(
        bot = bot,
        conversation_id = conversation_id,
        from = from,
        to = to,
        "Flow state transition"
    );
}

/// Log a failed step action
pub fn log_action_failure(bot: &str, conversation_id: i64, step: &str, error: &str) {
    error!(
        bot = bot,
        conversation_id = conversation_id,
        step = step,
        error = error,
        "Step action failed, conversation state left unchanged"
    );
}

/// Log an extension that failed to load
pub fn log_extension_failure(bot: &str, extension: &str, error: &str) {
    error!(
        bot = bot,
        extension = extension,
        error = error,
        "Extension failed to load, continuing without it"
    );
}

/// Log an outbound send that did not go through
pub fn log_send_failure(bot: &str, conversation_id: i64, error: &str) {
    warn!(
        bot = bot,
        conversation_id = conversation_id,
        error = error,
        "Failed to deliver message"
    );
}
