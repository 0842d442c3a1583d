//! Bot instance
//!
//! One configured account: its state store, flow engine, loaded extensions and
//! command table. Commands start flows; everything else goes to the engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{BotConfig, ProxyConfig};
use crate::extension::{BotContext, CreationOptions, ExtensionRegistry, LoadedExtension};
use crate::services::MessageSender;
use crate::state::{Dispatch, Effect, FlowEngine, StateStore, Update};
use crate::utils::errors::Result;
use crate::utils::logging;
use crate::utils::metrics::UpdateTimer;

const CANCEL_COMMAND: &str = "cancel";

/// What a bot did with an update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A command fired (and seeded its flow, if it has steps)
    Command(String),
    /// The built-in cancel ran; `true` when a flow was active
    Cancelled(bool),
    /// The update went to the flow engine
    Flow(Dispatch),
}

/// A running bot and everything it owns
pub struct BotInstance {
    name: String,
    account_id: i64,
    creator_id: i64,
    engine: Arc<FlowEngine>,
    /// command name -> description
    commands: BTreeMap<String, String>,
    extensions: Vec<LoadedExtension>,
    sender: Arc<dyn MessageSender>,
    built_in_abilities: bool,
}

impl std::fmt::Debug for BotInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotInstance")
            .field("name", &self.name)
            .field("account_id", &self.account_id)
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

impl BotInstance {
    /// Build a bot from its configuration.
    ///
    /// Fails only on a malformed token; extensions that fail to load are left out.
    pub async fn new(
        config: &BotConfig,
        global_proxy: &ProxyConfig,
        registry: &ExtensionRegistry,
        store: Arc<dyn StateStore>,
        sender: Arc<dyn MessageSender>,
    ) -> Result<Self> {
        let account_id = config.validate_account()?;
        let name = config.account.name.clone();
        info!(bot = %name, account_id = account_id, "Loading extensions...");

        let engine = Arc::new(FlowEngine::new(name.clone(), account_id, store));
        let context = BotContext::new(name.clone(), account_id, config.account.creator_id, engine.clone());
        let options = CreationOptions {
            bot_account_id: account_id,
            proxy: config.effective_proxy(global_proxy),
        };
        let extensions = registry
            .load_extensions(&context, &config.extensions, &options)
            .await;

        let built_in_abilities = !config.disable_built_in_abilities;
        let mut commands = BTreeMap::new();
        if built_in_abilities {
            commands.insert(
                CANCEL_COMMAND.to_string(),
                "Cancel the conversation in progress".to_string(),
            );
        }

        for loaded in &extensions {
            for ability in loaded.extension.abilities() {
                let command = ability.name().to_string();
                if commands.contains_key(&command) {
                    warn!(bot = %name, command = %command, extension = %loaded.identity,
                          "Command already provided, ignoring duplicate");
                    continue;
                }
                match engine.register_flow(ability.flow) {
                    Ok(()) => {
                        debug!(bot = %name, command = %command, extension = %loaded.identity,
                               factory = loaded.factory_name, "Ability registered");
                        commands.insert(command, ability.info);
                    }
                    Err(e) => logging::log_extension_failure(&name, &loaded.identity.to_string(), &e.to_string()),
                }
            }
        }

        info!(bot = %name, extensions = extensions.len(), commands = commands.len(), "Extensions loaded");

        Ok(Self {
            name,
            account_id,
            creator_id: config.account.creator_id,
            engine,
            commands,
            extensions,
            sender,
            built_in_abilities,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn account_id(&self) -> i64 {
        self.account_id
    }

    pub fn engine(&self) -> &Arc<FlowEngine> {
        &self.engine
    }

    pub fn extensions(&self) -> &[LoadedExtension] {
        &self.extensions
    }

    /// Context handed to extensions of this bot
    pub fn context(&self) -> BotContext {
        BotContext::new(self.name.clone(), self.account_id, self.creator_id, self.engine.clone())
    }

    /// `(command, description)` pairs, sorted by command
    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands
            .iter()
            .map(|(name, info)| (name.clone(), info.clone()))
            .collect()
    }

    /// Route one update and deliver whatever it produced
    pub async fn handle_update(&self, update: &Update) -> Result<UpdateOutcome> {
        let timer = UpdateTimer::start(&self.name, self.account_id);
        let result = self.route_update(update).await;
        if result.is_err() {
            timer.failed();
        }
        result
    }

    async fn route_update(&self, update: &Update) -> Result<UpdateOutcome> {
        if let Some(command) = self.match_command(update) {
            if self.built_in_abilities && command == CANCEL_COMMAND {
                let cancelled = self.engine.cancel(update.conversation_id).await?;
                let reply = if cancelled {
                    "Cancelled."
                } else {
                    "Nothing to cancel."
                };
                self.deliver(vec![Effect::send_text(update.conversation_id, reply)]).await;
                return Ok(UpdateOutcome::Cancelled(cancelled));
            }

            debug!(bot = %self.name, conversation_id = update.conversation_id, command = %command, "Command received");
            let effects = self.engine.start(&command, update).await?;
            self.deliver(effects).await;
            return Ok(UpdateOutcome::Command(command));
        }

        let dispatch = self.engine.dispatch(update).await?;
        self.deliver(dispatch.clone().into_effects()).await;
        Ok(UpdateOutcome::Flow(dispatch))
    }

    /// Registered command named by `/name` or `/name@this_bot`, if any
    fn match_command(&self, update: &Update) -> Option<String> {
        let text = update.text.as_deref()?;
        let word = text.split_whitespace().next()?.strip_prefix('/')?;
        let (command, target) = match word.split_once('@') {
            Some((command, target)) => (command, Some(target)),
            None => (word, None),
        };

        if let Some(target) = target {
            if !target.eq_ignore_ascii_case(&self.name) {
                return None;
            }
        }

        self.commands
            .contains_key(command)
            .then(|| command.to_string())
    }

    /// Best-effort delivery; failures are logged and never touch flow state
    async fn deliver(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::SendText { conversation_id, text } => {
                    if let Err(e) = self.sender.send_text(conversation_id, &text).await {
                        logging::log_send_failure(&self.name, conversation_id, &e.to_string());
                    }
                }
            }
        }
    }
}
