//! Application settings management
//!
//! This module defines the configuration structure and provides methods
//! for loading settings from TOML files and environment variables.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::extension::ExtensionIdentity;
use crate::utils::accounts::bot_account_id_from_token;
use crate::utils::errors::{FlowBotError, Result};

/// Main application configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub bots: Vec<BotConfig>,
}

/// Host-wide configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Root under which `data/db` and `data/extensions` live
    pub data_root: PathBuf,
    /// Proxy used by bots that do not set their own
    #[serde(default)]
    pub proxy: ProxyConfig,
}

/// Per-bot configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BotConfig {
    #[serde(default)]
    pub enabled: bool,
    pub account: BotAccount,
    /// Skip built-in abilities such as `/cancel`
    #[serde(default)]
    pub disable_built_in_abilities: bool,
    /// Extension packages, written as `group:artifact[:version]`
    #[serde(default)]
    pub extensions: Vec<ExtensionIdentity>,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default = "default_base_api_url")]
    pub base_api_url: String,
    /// Push the command table to Telegram when the bot starts
    #[serde(default)]
    pub auto_update_command_list: bool,
}

/// Bot account information
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BotAccount {
    /// Bot name, ideally the same as the username set in Telegram
    pub name: String,
    pub token: String,
    /// Telegram user id of the bot owner
    #[serde(default)]
    pub creator_id: i64,
}

impl BotAccount {
    /// Parse the account id out of the token.
    ///
    /// Callers parse once and keep the result; the id is never re-derived.
    pub fn account_id(&self) -> Result<i64> {
        bot_account_id_from_token(&self.token)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProxyType {
    #[default]
    NoProxy,
    Http,
    Https,
    Socks4,
    Socks5,
}

/// Proxy configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyConfig {
    #[serde(default, rename = "type")]
    pub proxy_type: ProxyType,
    #[serde(default = "default_proxy_host")]
    pub host: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
}

impl ProxyConfig {
    pub fn is_enabled(&self) -> bool {
        self.proxy_type != ProxyType::NoProxy
    }

    /// Proxy URL understood by reqwest, `None` when disabled
    pub fn to_url(&self) -> Option<String> {
        let scheme = match self.proxy_type {
            ProxyType::NoProxy => return None,
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks4 => "socks4",
            ProxyType::Socks5 => "socks5",
        };
        Some(format!("{}://{}:{}", scheme, self.host, self.port))
    }

    /// Pick the bot's own proxy, else the global one, else none
    pub fn resolve(bot: &ProxyConfig, global: &ProxyConfig) -> Option<ProxyConfig> {
        if bot.is_enabled() {
            Some(bot.clone())
        } else if global.is_enabled() {
            Some(global.clone())
        } else {
            None
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            proxy_type: ProxyType::NoProxy,
            host: default_proxy_host(),
            port: default_proxy_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    File,
    Redis,
    Memory,
}

/// Conversation state storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub redis: RedisConfig,
}

/// Redis configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub prefix: String,
}

/// Prometheus exporter configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enable: bool,
    pub port: u16,
    pub bind_address: String,
}

impl MetricsConfig {
    /// Address the exporter listens on
    pub fn listen_address(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.bind_address.parse().map_err(|_| {
            FlowBotError::Config(format!("Invalid metrics bind address `{}`", self.bind_address))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for the rolling log file; `None` logs to stdout only
    pub file_path: Option<String>,
}

impl Settings {
    /// Load settings from configuration file and environment variables
    pub fn new() -> Result<Self> {
        Self::from_file("config")
    }

    /// Load settings from the given file (extension optional) and environment
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("FLOWBOT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<()> {
        super::validation::validate_settings(self)
    }

    /// Directory holding per-bot state databases
    pub fn db_dir(&self) -> PathBuf {
        self.app.data_root.join("data").join("db")
    }

    /// Directory under which extension shared folders are created
    pub fn extensions_data_dir(&self) -> PathBuf {
        self.app.data_root.join("data").join("extensions")
    }

    /// Bots that are switched on
    pub fn enabled_bots(&self) -> impl Iterator<Item = &BotConfig> {
        self.bots.iter().filter(|bot| bot.enabled)
    }
}

impl BotConfig {
    /// Effective proxy for this bot
    pub fn effective_proxy(&self, global: &ProxyConfig) -> Option<ProxyConfig> {
        ProxyConfig::resolve(&self.proxy, global)
    }

    pub fn validate_account(&self) -> Result<i64> {
        self.account.account_id().map_err(|e| {
            FlowBotError::Config(format!("Bot `{}` has an invalid token: {}", self.account.name, e))
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            bots: vec![],
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("."),
            proxy: ProxyConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            redis: RedisConfig::default(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enable: false,
            port: 9386,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            prefix: "flowbot:".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
        }
    }
}

fn default_base_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_proxy_host() -> String {
    "127.0.0.1".to_string()
}

fn default_proxy_port() -> u16 {
    1080
}
