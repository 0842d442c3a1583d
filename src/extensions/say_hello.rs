//! `say_hello` extension
//!
//! A greeting command and a short conversation asking for the user's name.

use std::path::Path;

use tracing::{debug, error};

use crate::extension::{Ability, BotContext, CreationOptions, Extension, ExtensionFactory};
use crate::state::{Action, Effect, Flow, FlowContext, Predicate, Step, Update};
use crate::utils::errors::Result;

const NAME_PREFIX: &str = "my name is ";

pub struct SayHelloExtension {
    bot_name: String,
}

impl SayHelloExtension {
    pub fn new(bot_name: impl Into<String>) -> Self {
        Self {
            bot_name: bot_name.into(),
        }
    }

    /// `/say_hello`: who you are and where you are talking from
    fn say_hello(&self) -> Result<Ability> {
        let flow = Flow::builder("say_hello")
            .root(Action::handler("greet"))
            .handler("greet", greet)
            .build()?;
        Ok(Ability::new("Say hello to you.", flow))
    }

    /// `/hello`, then "hello", then "my name is ..."
    fn hello(&self) -> Result<Ability> {
        let flow = Flow::builder("hello")
            .root(Action::reply("Hello!"))
            .step(Step::new(
                "ask_name",
                Predicate::text_equals_ignore_case("hello"),
                Action::reply("What is your name?"),
            ))
            .step(Step::new(
                "answer_name",
                Predicate::text_starts_with(NAME_PREFIX),
                Action::handler("remember_name"),
            ))
            .handler("remember_name", remember_name)
            .build()?;
        Ok(Ability::new("Say hello!", flow))
    }
}

fn greet(ctx: &FlowContext, update: &Update) -> Result<Vec<Effect>> {
    let username = update.sender_username.as_deref().unwrap_or("(no username)");
    let language = update.language_code.as_deref().unwrap_or("unknown");
    Ok(vec![ctx.reply(format!(
        "Hello! {} ( {} ) [ {} ]\nCurrent Chat ID: {}",
        username, update.sender_id, language, ctx.conversation_id
    ))])
}

/// Echo whatever follows the prefix, even nothing; the flow ends either way
fn remember_name(ctx: &FlowContext, update: &Update) -> Result<Vec<Effect>> {
    let name = update
        .text_or_empty()
        .strip_prefix(NAME_PREFIX)
        .unwrap_or_default()
        .trim();
    Ok(vec![ctx.reply(format!("OK! Your name is {}", name))])
}

impl Extension for SayHelloExtension {
    fn name(&self) -> &str {
        "say_hello"
    }

    fn abilities(&self) -> Vec<Ability> {
        [self.say_hello(), self.hello()]
            .into_iter()
            .filter_map(|ability| match ability {
                Ok(ability) => Some(ability),
                Err(e) => {
                    error!(bot = %self.bot_name, error = %e, "Invalid say_hello ability");
                    None
                }
            })
            .collect()
    }
}

/// Creates [`SayHelloExtension`] for every bot
pub struct SayHelloFactory;

impl ExtensionFactory for SayHelloFactory {
    fn create_extension(
        &self,
        bot: &BotContext,
        shared_data_folder: &Path,
        _options: &CreationOptions,
    ) -> Result<Option<Box<dyn Extension>>> {
        debug!(bot = %bot.bot_name, folder = %shared_data_folder.display(), "Creating say_hello extension");
        Ok(Some(Box::new(SayHelloExtension::new(bot.bot_name.clone()))))
    }
}
