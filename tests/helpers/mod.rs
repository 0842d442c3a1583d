//! Test helpers module
//!
//! Shared fixtures for the integration tests: a recording message sender, a
//! small two-step extension and bot construction helpers.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use FlowBot::bot::BotInstance;
use FlowBot::config::{BotAccount, BotConfig, ProxyConfig, Settings};
use FlowBot::extension::{
    Ability, BotContext, CreationOptions, Extension, ExtensionFactory, ExtensionIdentity,
    ExtensionRegistry,
};
use FlowBot::services::MessageSender;
use FlowBot::state::{Action, Flow, Predicate, StateStore, Step};
use FlowBot::Result;

pub const TEST_TOKEN: &str = "1234567890:AAHXcNDBRZTKfyPED5Gi3PZDIKPOM6xhxwo";
pub const OTHER_TOKEN: &str = "987654321:AAHXcNDBRZTKfyPED5Gi3PZDIKPOM6xhxwo";

/// Initialize tracing once for the test binary
pub fn init_test_env() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("FlowBot=debug")
        .with_test_writer()
        .try_init();
}

/// Captures everything a bot sends
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(i64, String)>>,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, conversation_id: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(id, _)| *id == conversation_id)
            .map(|(_, text)| text)
            .collect()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send_text(&self, conversation_id: i64, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push((conversation_id, text.to_string()));
        Ok(())
    }
}

/// `/set_reply`, then "reply_01", then "reply_02"
pub struct SetReplyExtension;

impl Extension for SetReplyExtension {
    fn name(&self) -> &str {
        "set_reply"
    }

    fn abilities(&self) -> Vec<Ability> {
        let flow = Flow::builder("set_reply")
            .root(Action::reply("Send reply_01"))
            .step(Step::new("s1", Predicate::text_equals("reply_01"), Action::reply("Got reply_01")))
            .step(Step::new("s2", Predicate::text_equals("reply_02"), Action::reply("Got reply_02")))
            .build()
            .unwrap();
        vec![Ability::new("Start the reply chain", flow)]
    }
}

/// Builds [`SetReplyExtension`] and remembers the folders it was handed
#[derive(Clone, Default)]
pub struct SetReplyFactory {
    pub folders: Arc<Mutex<Vec<(String, PathBuf)>>>,
}

impl ExtensionFactory for SetReplyFactory {
    fn create_extension(
        &self,
        bot: &BotContext,
        shared_data_folder: &Path,
        _options: &CreationOptions,
    ) -> Result<Option<Box<dyn Extension>>> {
        self.folders
            .lock()
            .unwrap()
            .push((bot.bot_name.clone(), shared_data_folder.to_path_buf()));
        Ok(Some(Box::new(SetReplyExtension)))
    }
}

pub fn set_reply_identity() -> ExtensionIdentity {
    ExtensionIdentity::new("org.example", "set-reply")
}

/// Where a host rooted at `data_root` keeps extension folders
pub fn extensions_dir(data_root: &Path) -> PathBuf {
    let mut settings = Settings::default();
    settings.app.data_root = data_root.to_path_buf();
    settings.extensions_data_dir()
}

pub fn registry_with(data_root: &Path, factory: SetReplyFactory) -> ExtensionRegistry {
    let mut registry = ExtensionRegistry::new(extensions_dir(data_root));
    registry.register(&set_reply_identity(), factory);
    registry
}

pub fn bot_config(name: &str, token: &str, extensions: Vec<ExtensionIdentity>) -> BotConfig {
    BotConfig {
        enabled: true,
        account: BotAccount {
            name: name.to_string(),
            token: token.to_string(),
            creator_id: 0,
        },
        disable_built_in_abilities: false,
        extensions,
        proxy: ProxyConfig::default(),
        base_api_url: "https://api.telegram.org".to_string(),
        auto_update_command_list: false,
    }
}

/// A bot running the set_reply extension
pub async fn set_reply_bot(
    data_root: &Path,
    store: Arc<dyn StateStore>,
    sender: Arc<RecordingSender>,
) -> BotInstance {
    let registry = registry_with(data_root, SetReplyFactory::default());
    BotInstance::new(
        &bot_config("TestBot", TEST_TOKEN, vec![set_reply_identity()]),
        &ProxyConfig::default(),
        &registry,
        store,
        sender,
    )
    .await
    .unwrap()
}
