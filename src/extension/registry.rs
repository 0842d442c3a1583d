//! Extension registry
//!
//! Maps package identities to the factories that build their extensions and
//! hands every factory its shared data folder. Registration happens once at
//! startup; loading happens once per bot.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{BotContext, CreationOptions, Extension, ExtensionFactory, ExtensionIdentity};
use crate::utils::errors::{FlowBotError, Result};
use crate::utils::logging;

/// Extension produced for a bot, with where it came from
pub struct LoadedExtension {
    pub identity: ExtensionIdentity,
    pub factory_name: &'static str,
    pub extension: Box<dyn Extension>,
}

impl std::fmt::Debug for LoadedExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedExtension")
            .field("identity", &self.identity)
            .field("factory_name", &self.factory_name)
            .field("extension", &self.extension.name())
            .finish()
    }
}

#[derive(Clone)]
struct RegisteredFactory {
    name: &'static str,
    factory: Arc<dyn ExtensionFactory>,
}

/// Identity-to-factory table
#[derive(Clone)]
pub struct ExtensionRegistry {
    extensions_dir: PathBuf,
    factories: HashMap<(String, String), Vec<RegisteredFactory>>,
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("extensions_dir", &self.extensions_dir)
            .field("packages", &self.factories.len())
            .finish()
    }
}

impl ExtensionRegistry {
    /// Create an empty registry whose shared folders live under
    /// `extensions_dir` (see [`crate::config::Settings::extensions_data_dir`])
    pub fn new(extensions_dir: impl Into<PathBuf>) -> Self {
        Self {
            extensions_dir: extensions_dir.into(),
            factories: HashMap::new(),
        }
    }

    /// Register a factory for a package; a package may have several
    pub fn register<F>(&mut self, identity: &ExtensionIdentity, factory: F)
    where
        F: ExtensionFactory + 'static,
    {
        let name = std::any::type_name::<F>();
        debug!(extension = %identity, factory = name, "Extension factory registered");
        self.factories
            .entry(Self::key(identity))
            .or_default()
            .push(RegisteredFactory {
                name,
                factory: Arc::new(factory),
            });
    }

    pub fn is_registered(&self, identity: &ExtensionIdentity) -> bool {
        self.factories.contains_key(&Self::key(identity))
    }

    /// `{extensions_dir}/{group_id}/{artifact_id}`
    pub fn shared_data_folder(&self, identity: &ExtensionIdentity) -> PathBuf {
        self.extensions_dir
            .join(&identity.group_id)
            .join(&identity.artifact_id)
    }

    fn key(identity: &ExtensionIdentity) -> (String, String) {
        (identity.group_id.clone(), identity.artifact_id.clone())
    }

    /// Build the requested extensions for a bot.
    ///
    /// A factory that errors or panics is logged and skipped; the remaining
    /// factories and packages still load.
    pub async fn load_extensions(
        &self,
        bot: &BotContext,
        identities: &[ExtensionIdentity],
        options: &CreationOptions,
    ) -> Vec<LoadedExtension> {
        let mut loaded = Vec::new();

        for identity in identities {
            let Some(factories) = self.factories.get(&Self::key(identity)) else {
                warn!(bot = %bot.bot_name, extension = %identity, "No extension package matches, skipping");
                continue;
            };

            let folder = self.shared_data_folder(identity);
            if let Err(e) = tokio::fs::create_dir_all(&folder).await {
                logging::log_extension_failure(
                    &bot.bot_name,
                    &identity.to_string(),
                    &format!("Cannot create data folder {}: {}", folder.display(), e),
                );
                continue;
            }

            for registered in factories {
                match Self::create(registered, bot, &folder, options) {
                    Ok(Some(extension)) => {
                        debug!(bot = %bot.bot_name, extension = %identity, factory = registered.name,
                               name = extension.name(), "Extension created");
                        loaded.push(LoadedExtension {
                            identity: identity.clone(),
                            factory_name: registered.name,
                            extension,
                        });
                    }
                    Ok(None) => {
                        debug!(bot = %bot.bot_name, extension = %identity, factory = registered.name,
                               "Factory declined to create an extension");
                    }
                    Err(e) => logging::log_extension_failure(
                        &bot.bot_name,
                        &format!("{} ({})", identity, registered.name),
                        &e.to_string(),
                    ),
                }
            }
        }

        info!(bot = %bot.bot_name, loaded = loaded.len(), "Extensions loaded");
        loaded
    }

    fn create(
        registered: &RegisteredFactory,
        bot: &BotContext,
        folder: &Path,
        options: &CreationOptions,
    ) -> Result<Option<Box<dyn Extension>>> {
        catch_unwind(AssertUnwindSafe(|| {
            registered.factory.create_extension(bot, folder, options)
        }))
        .unwrap_or_else(|_| {
            Err(FlowBotError::Extension {
                extension: registered.name.to_string(),
                message: "factory panicked".to_string(),
            })
        })
    }
}
