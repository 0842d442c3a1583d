//! Extension contract
//!
//! Extensions are bundles of abilities (commands, optionally with a flow)
//! produced per bot by an [`ExtensionFactory`]. Factories are looked up by the
//! package's [`ExtensionIdentity`] in the [`ExtensionRegistry`].

pub mod registry;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ProxyConfig;
use crate::state::{Flow, FlowEngine};
use crate::utils::errors::{FlowBotError, Result};

pub use registry::{ExtensionRegistry, LoadedExtension};

/// Package coordinates of an extension, written `group:artifact[:version]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExtensionIdentity {
    pub group_id: String,
    pub artifact_id: String,
    pub version: Option<String>,
}

impl ExtensionIdentity {
    pub fn new(group_id: impl Into<String>, artifact_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Identity without the version, which is what factories and folders key on
    pub fn package(&self) -> (&str, &str) {
        (&self.group_id, &self.artifact_id)
    }
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

impl FromStr for ExtensionIdentity {
    type Err = FlowBotError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let (group_id, artifact_id, version) = match parts.as_slice() {
            [group, artifact] => (*group, *artifact, None),
            [group, artifact, version] if !version.is_empty() => (*group, *artifact, Some(*version)),
            _ => {
                return Err(FlowBotError::InvalidInput(format!(
                    "Extension identity must look like `group:artifact[:version]`, got `{}`",
                    s
                )))
            }
        };

        if !valid_segment(group_id) || !valid_segment(artifact_id) {
            return Err(FlowBotError::InvalidInput(format!(
                "Extension identity `{}` contains characters not allowed in a folder name",
                s
            )));
        }

        Ok(Self {
            group_id: group_id.to_string(),
            artifact_id: artifact_id.to_string(),
            version: version.map(str::to_string),
        })
    }
}

impl TryFrom<String> for ExtensionIdentity {
    type Error = FlowBotError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ExtensionIdentity> for String {
    fn from(identity: ExtensionIdentity) -> Self {
        identity.to_string()
    }
}

impl fmt::Display for ExtensionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}:{}:{}", self.group_id, self.artifact_id, version),
            None => write!(f, "{}:{}", self.group_id, self.artifact_id),
        }
    }
}

/// Options handed to a factory alongside the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationOptions {
    pub bot_account_id: i64,
    /// Proxy the bot itself uses, for extensions making their own requests
    pub proxy: Option<ProxyConfig>,
}

/// The bot an extension is being created for
#[derive(Debug, Clone)]
pub struct BotContext {
    pub bot_name: String,
    pub account_id: i64,
    pub creator_id: i64,
    engine: Arc<FlowEngine>,
}

impl BotContext {
    pub fn new(bot_name: impl Into<String>, account_id: i64, creator_id: i64, engine: Arc<FlowEngine>) -> Self {
        Self {
            bot_name: bot_name.into(),
            account_id,
            creator_id,
            engine,
        }
    }

    /// Take a conversation out of any flow it is in
    pub async fn cancel_reply_state(&self, conversation_id: i64) -> Result<bool> {
        self.engine.cancel(conversation_id).await
    }

    /// Step the conversation is waiting on, if any
    pub async fn current_step(&self, conversation_id: i64) -> Result<Option<String>> {
        self.engine.current_step(conversation_id).await
    }
}

/// A command exposed by an extension, optionally followed by a flow.
///
/// The command name is the flow's name; a command without follow-up steps is
/// a flow with a root action only.
#[derive(Debug, Clone)]
pub struct Ability {
    pub info: String,
    pub flow: Flow,
}

impl Ability {
    pub fn new(info: impl Into<String>, flow: Flow) -> Self {
        Self {
            info: info.into(),
            flow,
        }
    }

    pub fn name(&self) -> &str {
        &self.flow.name
    }
}

/// A loaded feature module
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    fn abilities(&self) -> Vec<Ability>;
}

/// Produces extensions for bots
pub trait ExtensionFactory: Send + Sync {
    /// Create the extension for `bot`.
    ///
    /// `shared_data_folder` is the same for every bot loading this package, so
    /// concurrent bots must coordinate their own access to it. Returning
    /// `Ok(None)` declines to extend this bot.
    fn create_extension(
        &self,
        bot: &BotContext,
        shared_data_folder: &Path,
        options: &CreationOptions,
    ) -> Result<Option<Box<dyn Extension>>>;
}
