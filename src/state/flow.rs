//! Conversation flows
//!
//! A flow is a command-bound root action followed by a chain of steps. Steps
//! are plain descriptors (id, predicate, action, next) so a chain can be
//! inspected, serialized and tested without running a bot.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::context::{Effect, FlowContext, Update};
use crate::utils::errors::{FlowBotError, Result};

/// Gate deciding whether a step accepts an update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Predicate {
    Always,
    HasText,
    TextEquals(String),
    TextEqualsIgnoreCase(String),
    TextStartsWith(String),
    /// Regular expression searched in the text
    TextMatches(String),
}

impl Predicate {
    pub fn text_equals(text: impl Into<String>) -> Self {
        Predicate::TextEquals(text.into())
    }

    pub fn text_equals_ignore_case(text: impl Into<String>) -> Self {
        Predicate::TextEqualsIgnoreCase(text.into())
    }

    pub fn text_starts_with(prefix: impl Into<String>) -> Self {
        Predicate::TextStartsWith(prefix.into())
    }

    pub fn text_matches(pattern: impl Into<String>) -> Self {
        Predicate::TextMatches(pattern.into())
    }
}

/// What a step (or a flow's root) does once it fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Action {
    /// Send fixed text back to the conversation
    Reply(String),
    /// Run a handler registered on the flow under this name
    Handler(String),
}

impl Action {
    pub fn reply(text: impl Into<String>) -> Self {
        Action::Reply(text.into())
    }

    pub fn handler(name: impl Into<String>) -> Self {
        Action::Handler(name.into())
    }
}

/// Code behind [`Action::Handler`]
pub trait ActionHandler: Send + Sync {
    fn handle(&self, ctx: &FlowContext, update: &Update) -> Result<Vec<Effect>>;
}

impl<F> ActionHandler for F
where
    F: Fn(&FlowContext, &Update) -> Result<Vec<Effect>> + Send + Sync,
{
    fn handle(&self, ctx: &FlowContext, update: &Update) -> Result<Vec<Effect>> {
        self(ctx, update)
    }
}

/// One predicate/action unit of a flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub predicate: Predicate,
    pub action: Action,
    /// Step that becomes current after this one fires; `None` ends the flow
    pub next: Option<String>,
}

impl Step {
    pub fn new(id: impl Into<String>, predicate: Predicate, action: Action) -> Self {
        Self {
            id: id.into(),
            predicate,
            action,
            next: None,
        }
    }

    /// Point this step at an explicit successor instead of the next one added
    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }
}

/// Persisted pointer to a step: `{flow}/{step}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepRef {
    pub flow: String,
    pub step: String,
}

impl StepRef {
    pub fn new(flow: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            flow: flow.into(),
            step: step.into(),
        }
    }
}

impl fmt::Display for StepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.flow, self.step)
    }
}

impl FromStr for StepRef {
    type Err = FlowBotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((flow, step)) if !flow.is_empty() && !step.is_empty() => {
                Ok(StepRef::new(flow, step))
            }
            _ => Err(FlowBotError::Storage(format!("Malformed step id: {}", s))),
        }
    }
}

/// A command-bound chain of steps
#[derive(Clone, Serialize, Deserialize)]
pub struct Flow {
    pub name: String,
    /// Runs unconditionally when the bound command fires
    pub root: Action,
    /// Steps in declaration order; the first one is the head of the chain
    pub steps: Vec<Step>,
    #[serde(skip)]
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
    #[serde(skip)]
    patterns: HashMap<String, Regex>,
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handlers: Vec<&String> = self.handlers.keys().collect();
        handlers.sort();
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("steps", &self.steps)
            .field("handlers", &handlers)
            .finish()
    }
}

impl Flow {
    pub fn builder(name: impl Into<String>) -> FlowBuilder {
        FlowBuilder {
            name: name.into(),
            root: None,
            steps: Vec::new(),
            last_linked: None,
            handlers: HashMap::new(),
        }
    }

    /// Attach handlers to a flow that was deserialized, then validate it
    pub fn with_handlers(
        mut self,
        handlers: HashMap<String, Arc<dyn ActionHandler>>,
    ) -> Result<Self> {
        self.handlers = handlers;
        self.compile()?;
        Ok(self)
    }

    pub fn head(&self) -> Option<&Step> {
        self.steps.first()
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.id == id)
    }

    pub fn step_ref(&self, step: &Step) -> StepRef {
        StepRef::new(self.name.clone(), step.id.clone())
    }

    /// Evaluate a step's predicate against an update
    pub fn accepts(&self, step: &Step, update: &Update) -> bool {
        match &step.predicate {
            Predicate::Always => true,
            Predicate::HasText => update.has_text(),
            Predicate::TextEquals(expected) => update.text.as_deref() == Some(expected.as_str()),
            Predicate::TextEqualsIgnoreCase(expected) => update
                .text
                .as_deref()
                .is_some_and(|text| text.eq_ignore_ascii_case(expected)),
            Predicate::TextStartsWith(prefix) => update
                .text
                .as_deref()
                .is_some_and(|text| text.starts_with(prefix.as_str())),
            Predicate::TextMatches(pattern) => match (update.text.as_deref(), self.patterns.get(pattern)) {
                (Some(text), Some(regex)) => regex.is_match(text),
                _ => false,
            },
        }
    }

    /// Run an action and collect its effects.
    ///
    /// A panicking handler is reported as an action error.
    pub fn run(&self, action: &Action, ctx: &FlowContext, update: &Update) -> Result<Vec<Effect>> {
        match action {
            Action::Reply(text) => Ok(vec![ctx.reply(text.clone())]),
            Action::Handler(name) => {
                let handler = self.handlers.get(name).ok_or_else(|| {
                    FlowBotError::action(ctx.location(), format!("No handler named `{}`", name))
                })?;
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler.handle(ctx, update)))
                    .unwrap_or_else(|_| {
                        Err(FlowBotError::action(
                            ctx.location(),
                            format!("Handler `{}` panicked", name),
                        ))
                    })
            }
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> FlowBotError {
        FlowBotError::InvalidFlow {
            flow: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn check_action(&self, action: &Action) -> Result<()> {
        if let Action::Handler(name) = action {
            if !self.handlers.contains_key(name) {
                return Err(self.invalid(format!("Handler `{}` is not registered", name)));
            }
        }
        Ok(())
    }

    /// Validate the chain and compile its patterns
    fn compile(&mut self) -> Result<()> {
        if self.name.is_empty() || self.name.contains('/') || self.name.contains(char::is_whitespace) {
            return Err(self.invalid("Flow names must be non-empty, without '/' or whitespace"));
        }

        self.check_action(&self.root)?;

        let mut ids = HashSet::new();
        for step in &self.steps {
            if step.id.is_empty() {
                return Err(self.invalid("Step ids must not be empty"));
            }
            if !ids.insert(step.id.as_str()) {
                return Err(self.invalid(format!("Duplicate step id `{}`", step.id)));
            }
        }

        let mut patterns = HashMap::new();
        for step in &self.steps {
            if let Some(next) = &step.next {
                if !ids.contains(next.as_str()) {
                    return Err(self.invalid(format!(
                        "Step `{}` points at unknown step `{}`",
                        step.id, next
                    )));
                }
            }
            self.check_action(&step.action)?;
            if let Predicate::TextMatches(pattern) = &step.predicate {
                let regex = Regex::new(pattern).map_err(|e| {
                    self.invalid(format!("Step `{}` has an invalid pattern: {}", step.id, e))
                })?;
                patterns.insert(pattern.clone(), regex);
            }
        }

        self.patterns = patterns;
        Ok(())
    }
}

/// Builder for [`Flow`]; steps added in order form a linear chain unless a
/// step names its successor explicitly.
pub struct FlowBuilder {
    name: String,
    root: Option<Action>,
    steps: Vec<Step>,
    /// Index of the last step appended with [`FlowBuilder::step`]
    last_linked: Option<usize>,
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl FlowBuilder {
    pub fn root(mut self, action: Action) -> Self {
        self.root = Some(action);
        self
    }

    /// Append a step, linking the previous chained step to it unless that
    /// step already names its successor
    pub fn step(mut self, step: Step) -> Self {
        if let Some(previous) = self.last_linked.and_then(|index| self.steps.get_mut(index)) {
            if previous.next.is_none() {
                previous.next = Some(step.id.clone());
            }
        }
        self.last_linked = Some(self.steps.len());
        self.steps.push(step);
        self
    }

    /// Append a step outside the chain.
    ///
    /// It is only reachable through an explicit `next`, and later calls to
    /// [`FlowBuilder::step`] never link it; it ends the flow unless it names
    /// its own successor.
    pub fn detached_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn handler<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&FlowContext, &Update) -> Result<Vec<Effect>> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn shared_handler(mut self, name: impl Into<String>, handler: Arc<dyn ActionHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn build(self) -> Result<Flow> {
        let root = self.root.ok_or_else(|| FlowBotError::InvalidFlow {
            flow: self.name.clone(),
            reason: "A root action is required".to_string(),
        })?;

        let mut flow = Flow {
            name: self.name,
            root,
            steps: self.steps,
            handlers: self.handlers,
            patterns: HashMap::new(),
        };
        flow.compile()?;
        Ok(flow)
    }
}
