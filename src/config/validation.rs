//! Configuration validation module
//!
//! This module provides validation functions for application configuration
//! to ensure all required settings are properly configured.

use std::collections::HashSet;

use super::settings::{
    BotConfig, LoggingConfig, MetricsConfig, ProxyConfig, StorageBackend, StorageConfig,
};
use super::Settings;
use crate::utils::errors::{FlowBotError, Result};

/// Validate all configuration settings
pub fn validate_settings(settings: &Settings) -> Result<()> {
    validate_proxy_config(&settings.app.proxy)?;
    validate_storage_config(&settings.storage)?;
    validate_logging_config(&settings.logging)?;
    validate_metrics_config(&settings.metrics)?;

    let mut account_ids = HashSet::new();
    for bot in settings.enabled_bots() {
        let account_id = validate_bot_config(bot)?;
        if !account_ids.insert(account_id) {
            return Err(FlowBotError::Config(format!(
                "Bot account {} is configured more than once",
                account_id
            )));
        }
    }

    Ok(())
}

/// Validate bot configuration, returning the parsed account id
fn validate_bot_config(config: &BotConfig) -> Result<i64> {
    if config.account.name.trim().is_empty() {
        return Err(FlowBotError::Config("Bot name is required".to_string()));
    }

    if config.account.token.is_empty() {
        return Err(FlowBotError::Config(format!(
            "Bot `{}` has no token",
            config.account.name
        )));
    }

    let account_id = config.validate_account()?;

    url::Url::parse(&config.base_api_url).map_err(|e| {
        FlowBotError::Config(format!(
            "Bot `{}` has an invalid base API URL: {}",
            config.account.name, e
        ))
    })?;

    validate_proxy_config(&config.proxy)?;

    Ok(account_id)
}

/// Validate proxy configuration
fn validate_proxy_config(config: &ProxyConfig) -> Result<()> {
    if !config.is_enabled() {
        return Ok(());
    }

    if config.host.is_empty() {
        return Err(FlowBotError::Config("Proxy host is required".to_string()));
    }

    if config.port == 0 {
        return Err(FlowBotError::Config(
            "Proxy port must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

/// Validate storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<()> {
    if config.backend == StorageBackend::Redis && config.redis.url.is_empty() {
        return Err(FlowBotError::Config("Redis URL is required".to_string()));
    }

    Ok(())
}

/// Validate metrics exporter configuration
fn validate_metrics_config(config: &MetricsConfig) -> Result<()> {
    if !config.enable {
        return Ok(());
    }

    if config.port == 0 {
        return Err(FlowBotError::Config(
            "Metrics port must be greater than 0".to_string(),
        ));
    }

    config.listen_address()?;
    Ok(())
}

/// Validate logging configuration
fn validate_logging_config(config: &LoggingConfig) -> Result<()> {
    if config.level.is_empty() {
        return Err(FlowBotError::Config("Log level is required".to_string()));
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.level.as_str()) {
        return Err(FlowBotError::Config(format!(
            "Invalid log level: {}. Valid levels: {:?}",
            config.level, valid_levels
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{BotAccount, ProxyType};
    use assert_matches::assert_matches;

    fn bot(token: &str) -> BotConfig {
        BotConfig {
            enabled: true,
            account: BotAccount {
                name: "TestBot".to_string(),
                token: token.to_string(),
                creator_id: 0,
            },
            disable_built_in_abilities: false,
            extensions: vec![],
            proxy: ProxyConfig::default(),
            base_api_url: "https://api.telegram.org".to_string(),
            auto_update_command_list: false,
        }
    }

    #[test]
    fn test_malformed_token_is_rejected() {
        let mut settings = Settings::default();
        settings.bots.push(bot("12c34d56a7890:AAHXcNDBRZTKfyPED5Gi3PZDIKPOM6xhxwo"));
        assert_matches!(validate_settings(&settings), Err(FlowBotError::Config(_)));
    }

    #[test]
    fn test_disabled_bots_are_not_validated() {
        let mut settings = Settings::default();
        let mut disabled = bot("not-a-token");
        disabled.enabled = false;
        settings.bots.push(disabled);
        assert!(validate_settings(&settings).is_ok());
    }

    #[test]
    fn test_duplicate_accounts_are_rejected() {
        let mut settings = Settings::default();
        settings.bots.push(bot("1234567890:AAHXcNDBRZTKfyPED5Gi3PZDIKPOM6xhxwo"));
        settings.bots.push(bot("1234567890:BBHXcNDBRZTKfyPED5Gi3PZDIKPOM6xhxwo"));
        assert_matches!(validate_settings(&settings), Err(FlowBotError::Config(_)));
    }

    #[test]
    fn test_enabled_proxy_needs_port() {
        let mut settings = Settings::default();
        settings.app.proxy = ProxyConfig {
            proxy_type: ProxyType::Http,
            host: "proxy.local".to_string(),
            port: 0,
        };
        assert_matches!(validate_settings(&settings), Err(FlowBotError::Config(_)));
    }

    #[test]
    fn test_enabled_metrics_need_a_valid_address() {
        let mut settings = Settings::default();
        settings.metrics.bind_address = "not an ip".to_string();
        assert!(validate_settings(&settings).is_ok());

        settings.metrics.enable = true;
        assert_matches!(validate_settings(&settings), Err(FlowBotError::Config(_)));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.logging.level = "verbose".to_string();
        assert!(validate_settings(&settings).is_err());
    }
}
