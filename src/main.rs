//! FlowBot
//!
//! Main application entry point

use std::sync::Arc;

use anyhow::Context;
use futures::future::join_all;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::Update;
use tracing::{error, info, warn};

use FlowBot::{
    bot::BotInstance,
    config::{BotConfig, Settings},
    extension::ExtensionRegistry,
    extensions::builtin_registry,
    handlers::handle_message,
    services::{build_telegram_bot, TelegramSender},
    state::open_state_store,
    utils::{logging, metrics},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Load configuration
    let settings = Settings::new().context("Failed to load configuration")?;
    settings.validate().context("Invalid configuration")?;

    // Initialize logging; the guard flushes the log file on exit
    let _log_guard = logging::init_logging(&settings.logging)?;

    info!("Starting {}...", FlowBot::info());
    info!(data_root = %settings.app.data_root.display(), "Data root");

    metrics::init_metrics(&settings.metrics).context("Failed to start metrics exporter")?;

    let registry = builtin_registry(settings.extensions_data_dir());

    let mut dispatchers = Vec::new();
    for bot_config in settings.enabled_bots() {
        match launch_bot(&settings, bot_config, &registry).await {
            Ok(dispatcher) => {
                metrics::bot_online();
                dispatchers.push(dispatcher);
            }
            Err(e) => error!(bot = %bot_config.account.name, error = %e, "Failed to start bot"),
        }
    }

    if dispatchers.is_empty() {
        warn!("No bot was started, exiting");
        return Ok(());
    }

    info!(bots = dispatchers.len(), "FlowBot is ready!");
    join_all(
        dispatchers
            .into_iter()
            .map(|mut dispatcher| async move { dispatcher.dispatch().await }),
    )
    .await;

    info!("FlowBot has been shut down.");
    Ok(())
}

type DispatchError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Build one bot and the dispatcher that polls for it
async fn launch_bot(
    settings: &Settings,
    config: &BotConfig,
    registry: &ExtensionRegistry,
) -> anyhow::Result<Dispatcher<Bot, DispatchError, teloxide::dispatching::DefaultKey>> {
    let account_id = config.validate_account()?;
    info!(bot = %config.account.name, account_id = account_id, "Starting bot...");

    let proxy = config.effective_proxy(&settings.app.proxy);
    let telegram = build_telegram_bot(&config.account.token, &config.base_api_url, proxy.as_ref())?;
    let sender = TelegramSender::new(telegram.clone());
    sender
        .verify_token()
        .await
        .with_context(|| format!("Bot `{}` could not log in", config.account.name))?;

    let store = open_state_store(settings, account_id)
        .await
        .with_context(|| format!("Failed to open state store for bot `{}`", config.account.name))?;

    let instance = BotInstance::new(config, &settings.app.proxy, registry, store, Arc::new(sender.clone())).await?;

    sender
        .sync_command_list(config.auto_update_command_list, &instance.commands())
        .await;

    let dispatcher = Dispatcher::builder(telegram, create_handler())
        .dependencies(dptree::deps![Arc::new(instance)])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .enable_ctrlc_handler()
        .build();

    Ok(dispatcher)
}

/// Create the main update handler
fn create_handler() -> UpdateHandler<DispatchError> {
    dptree::entry().branch(Update::filter_message().endpoint(handle_message))
}
