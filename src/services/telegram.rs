//! Telegram delivery service
//!
//! Builds the per-bot `teloxide` client (custom API URL, optional proxy) and
//! implements [`MessageSender`] on top of it.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{BotCommand, Me};
use teloxide::{ApiError, RequestError};
use tracing::{debug, error, info, warn};

use super::MessageSender;
use crate::config::ProxyConfig;
use crate::utils::errors::{FlowBotError, Result};

/// Create a `teloxide` bot for a token, API endpoint and proxy
pub fn build_telegram_bot(token: &str, base_api_url: &str, proxy: Option<&ProxyConfig>) -> Result<Bot> {
    let mut builder = teloxide::net::default_reqwest_settings();
    if let Some(proxy_url) = proxy.and_then(ProxyConfig::to_url) {
        debug!(proxy = %proxy_url, "Routing Telegram requests through proxy");
        builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
    }
    let client = builder.build()?;

    let api_url = url::Url::parse(base_api_url)?;
    Ok(Bot::with_client(token, client).set_api_url(api_url))
}

/// Sends messages through the Telegram Bot API
#[derive(Clone)]
pub struct TelegramSender {
    bot: Bot,
}

impl TelegramSender {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Confirm with `getMe` that Telegram accepts the token.
    ///
    /// A rejected token is reported as [`FlowBotError::InvalidCredential`];
    /// other failures keep their Telegram error.
    pub async fn verify_token(&self) -> Result<Me> {
        match self.bot.get_me().await {
            Ok(me) => {
                debug!(username = me.user.username.as_deref().unwrap_or_default(), "Bot token accepted by Telegram");
                Ok(me)
            }
            Err(RequestError::Api(ApiError::InvalidToken)) => {
                error!("Telegram rejected the bot token, check the configuration");
                Err(FlowBotError::InvalidCredential(
                    "Telegram rejected the bot token".to_string(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Push the command table when `enabled`; a failed update is only logged.
    ///
    /// Returns whether the list was updated.
    pub async fn sync_command_list(&self, enabled: bool, commands: &[(String, String)]) -> bool {
        if !enabled {
            debug!("Automatic command list update is off");
            return false;
        }
        match self.update_command_list(commands).await {
            Ok(()) => {
                info!(commands = commands.len(), "Bot command list updated");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to update command list");
                false
            }
        }
    }

    /// Replace the command list shown by Telegram clients
    pub async fn update_command_list(&self, commands: &[(String, String)]) -> Result<()> {
        if commands.is_empty() {
            info!("Bot has no commands, command list update skipped");
            return Ok(());
        }

        let commands: Vec<BotCommand> = commands
            .iter()
            .map(|(name, info)| {
                let info = if info.trim().is_empty() {
                    "(The command has no description)"
                } else {
                    info.trim()
                };
                BotCommand::new(name.clone(), info)
            })
            .collect();

        self.bot.delete_my_commands().await?;
        self.bot.set_my_commands(commands).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageSender for TelegramSender {
    async fn send_text(&self, conversation_id: i64, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(conversation_id), text.to_string())
            .await
            .map_err(FlowBotError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyType;

    const TOKEN: &str = "1234567890:AAHXcNDBRZTKfyPED5Gi3PZDIKPOM6xhxwo";

    #[test]
    fn test_build_bot_with_custom_api_url() {
        let bot = build_telegram_bot(TOKEN, "http://localhost:8081", None).unwrap();
        assert_eq!(bot.api_url().as_str(), "http://localhost:8081/");
        assert_eq!(bot.token(), TOKEN);
    }

    #[test]
    fn test_build_bot_with_proxy() {
        let proxy = ProxyConfig {
            proxy_type: ProxyType::Socks5,
            host: "127.0.0.1".to_string(),
            port: 1080,
        };
        assert!(build_telegram_bot(TOKEN, "https://api.telegram.org", Some(&proxy)).is_ok());
    }

    #[test]
    fn test_build_bot_rejects_bad_url() {
        assert!(matches!(
            build_telegram_bot(TOKEN, "not a url", None),
            Err(FlowBotError::UrlParse(_))
        ));
    }
}
