//! Flow engine
//!
//! Per-conversation state machine driving [`Flow`]s. Updates of one
//! conversation are serialized by a lock keyed on the conversation id; updates
//! of different conversations never wait for each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ::metrics::counter;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::context::{Effect, FlowContext, Update};
use super::flow::{Flow, Step, StepRef};
use super::locks::ConversationLocks;
use super::storage::StateStore;
use crate::utils::errors::{FlowBotError, Result};
use crate::utils::{logging, metrics};

/// How the engine handled an update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The conversation is not inside a flow
    Inactive,
    /// The current step's predicate rejected the update; nothing changed
    Declined { current: StepRef },
    /// The step fired and its successor is now current
    Advanced { from: StepRef, to: StepRef, effects: Vec<Effect> },
    /// The last step fired and the conversation left the flow
    Completed { from: StepRef, effects: Vec<Effect> },
    /// The stored step no longer exists and was cleared
    Stale { step_id: String },
}

impl Dispatch {
    /// Whether the engine consumed the update
    pub fn is_handled(&self) -> bool {
        matches!(self, Dispatch::Advanced { .. } | Dispatch::Completed { .. })
    }

    pub fn into_effects(self) -> Vec<Effect> {
        match self {
            Dispatch::Advanced { effects, .. } | Dispatch::Completed { effects, .. } => effects,
            _ => Vec::new(),
        }
    }
}

/// Drives flows for one bot against its state store
pub struct FlowEngine {
    bot_name: String,
    account_id: i64,
    store: Arc<dyn StateStore>,
    flows: DashMap<String, Arc<Flow>>,
    locks: ConversationLocks,
    steps_executed: AtomicU64,
}

impl std::fmt::Debug for FlowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEngine")
            .field("bot_name", &self.bot_name)
            .field("account_id", &self.account_id)
            .field("store", &self.store)
            .field("flows", &self.flows.len())
            .finish_non_exhaustive()
    }
}

impl FlowEngine {
    pub fn new(bot_name: impl Into<String>, account_id: i64, store: Arc<dyn StateStore>) -> Self {
        Self {
            bot_name: bot_name.into(),
            account_id,
            store,
            flows: DashMap::new(),
            locks: ConversationLocks::new(),
            steps_executed: AtomicU64::new(0),
        }
    }

    /// Make a flow available to `start` and `dispatch`
    pub fn register_flow(&self, flow: Flow) -> Result<()> {
        let name = flow.name.clone();
        match self.flows.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(FlowBotError::InvalidFlow {
                flow: name,
                reason: "A flow with this name is already registered".to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(bot = %self.bot_name, flow = %name, steps = flow.steps.len(), "Flow registered");
                slot.insert(Arc::new(flow));
                Ok(())
            }
        }
    }

    pub fn flow(&self, name: &str) -> Option<Arc<Flow>> {
        self.flows.get(name).map(|flow| flow.value().clone())
    }

    /// Number of actions run so far, root actions included; also exported as
    /// [`metrics::flow::STEPS_EXECUTED_TOTAL`]
    pub fn steps_executed(&self) -> u64 {
        self.steps_executed.load(Ordering::Relaxed)
    }

    /// Step the conversation is waiting on, if any
    pub async fn current_step(&self, conversation_id: i64) -> Result<Option<String>> {
        self.store.get(conversation_id).await
    }

    /// Run a flow's root action and seed its first step.
    ///
    /// Any step already active for the conversation is replaced. If the root
    /// action fails nothing is seeded.
    pub async fn start(&self, flow_name: &str, update: &Update) -> Result<Vec<Effect>> {
        let flow = self.flow(flow_name).ok_or_else(|| {
            FlowBotError::InvalidInput(format!("Unknown flow `{}`", flow_name))
        })?;
        let conversation_id = update.conversation_id;

        let _guard = self.locks.lock(conversation_id).await;
        self.start_locked(&flow, update).await
    }

    async fn start_locked(&self, flow: &Flow, update: &Update) -> Result<Vec<Effect>> {
        let conversation_id = update.conversation_id;
        let ctx = self.context(conversation_id, None);

        let effects = self.execute(flow, &flow.root, &ctx, update)?;

        if let Some(head) = flow.head() {
            let seeded = flow.step_ref(head).to_string();
            let previous = self.store.get(conversation_id).await?;
            if let Some(previous) = &previous {
                info!(bot = %self.bot_name, conversation_id = conversation_id, replaced = %previous,
                      "Starting a flow replaced an active step");
            }
            self.store.put(conversation_id, &seeded).await?;
            logging::log_flow_transition(&self.bot_name, conversation_id, previous.as_deref(), Some(seeded.as_str()));
        }

        Ok(effects)
    }

    /// Offer an update to the step its conversation is waiting on
    pub async fn dispatch(&self, update: &Update) -> Result<Dispatch> {
        let conversation_id = update.conversation_id;

        let _guard = self.locks.lock(conversation_id).await;
        self.dispatch_locked(update).await
    }

    async fn dispatch_locked(&self, update: &Update) -> Result<Dispatch> {
        let conversation_id = update.conversation_id;

        let Some(step_id) = self.store.get(conversation_id).await? else {
            return Ok(Dispatch::Inactive);
        };

        let Some((flow, step)) = self.resolve(&step_id) else {
            warn!(bot = %self.bot_name, conversation_id = conversation_id, step = %step_id,
                  "Stored step does not match any registered flow, clearing it");
            self.store.remove(conversation_id).await?;
            return Ok(Dispatch::Stale { step_id });
        };
        let current = flow.step_ref(&step);

        if !flow.accepts(&step, update) {
            debug!(bot = %self.bot_name, conversation_id = conversation_id, step = %current,
                   "Update declined by current step");
            return Ok(Dispatch::Declined { current });
        }

        let ctx = self.context(conversation_id, Some(current.to_string()));
        let effects = self.execute(&flow, &step.action, &ctx, update)?;

        match step.next.as_deref().and_then(|next| flow.step(next)) {
            Some(next) => {
                let to = flow.step_ref(next);
                let to_id = to.to_string();
                self.store.put(conversation_id, &to_id).await?;
                logging::log_flow_transition(
                    &self.bot_name,
                    conversation_id,
                    Some(step_id.as_str()),
                    Some(to_id.as_str()),
                );
                Ok(Dispatch::Advanced { from: current, to, effects })
            }
            None => {
                self.store.remove(conversation_id).await?;
                logging::log_flow_transition(&self.bot_name, conversation_id, Some(step_id.as_str()), None);
                Ok(Dispatch::Completed { from: current, effects })
            }
        }
    }

    /// Drop the conversation out of whatever flow it is in.
    ///
    /// Returns whether there was anything to cancel. Waits for an update of the
    /// same conversation that is being processed, so it only affects the next one.
    pub async fn cancel(&self, conversation_id: i64) -> Result<bool> {
        let existed = {
            let _guard = self.locks.lock(conversation_id).await;
            self.store.remove(conversation_id).await?
        };
        if existed {
            info!(bot = %self.bot_name, conversation_id = conversation_id, "Conversation flow cancelled");
        }
        Ok(existed)
    }

    fn resolve(&self, step_id: &str) -> Option<(Arc<Flow>, Step)> {
        let step_ref: StepRef = step_id.parse().ok()?;
        let flow = self.flow(&step_ref.flow)?;
        let step = flow.step(&step_ref.step)?.clone();
        Some((flow, step))
    }

    fn context(&self, conversation_id: i64, step: Option<String>) -> FlowContext {
        FlowContext {
            bot_name: self.bot_name.clone(),
            bot_account_id: self.account_id,
            conversation_id,
            step,
        }
    }

    fn execute(
        &self,
        flow: &Flow,
        action: &super::flow::Action,
        ctx: &FlowContext,
        update: &Update,
    ) -> Result<Vec<Effect>> {
        self.steps_executed.fetch_add(1, Ordering::Relaxed);
        counter!(
            metrics::flow::STEPS_EXECUTED_TOTAL,
            metrics::BOT_NAME_LABEL => self.bot_name.clone()
        )
        .increment(1);
        flow.run(action, ctx, update).map_err(|e| {
            logging::log_action_failure(&self.bot_name, ctx.conversation_id, ctx.location(), &e.to_string());
            e
        })
    }

    /// Snapshot of which conversations sit on which step
    pub async fn active_conversations(&self) -> Result<HashMap<i64, String>> {
        let mut active = HashMap::new();
        for conversation_id in self.store.conversations().await? {
            if let Some(step) = self.store.get(conversation_id).await? {
                active.insert(conversation_id, step);
            }
        }
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::flow::{Action, Predicate};
    use crate::state::storage::MemoryStateStore;
    use assert_matches::assert_matches;

    const CHAT: i64 = 10001;

    fn engine() -> FlowEngine {
        let engine = FlowEngine::new("TestBot", 1234567890, Arc::new(MemoryStateStore::new()));
        engine
            .register_flow(
                Flow::builder("set_reply")
                    .root(Action::reply("Reply set!"))
                    .step(Step::new("s1", Predicate::text_equals("reply_01"), Action::reply("Reply 01")))
                    .step(Step::new("s2", Predicate::text_equals("reply_02"), Action::reply("Reply 02")))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_cancel_without_flow_returns_false() {
        let engine = engine();
        assert!(!engine.cancel(CHAT).await.unwrap());
        assert!(!engine.cancel(CHAT).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let engine = engine();
        engine.start("set_reply", &Update::text(CHAT, 1, "/set_reply")).await.unwrap();
        assert!(engine.cancel(CHAT).await.unwrap());
        assert!(!engine.cancel(CHAT).await.unwrap());
    }

    #[tokio::test]
    async fn test_chain_advances_and_clears() {
        let engine = engine();
        let effects = engine
            .start("set_reply", &Update::text(CHAT, 1, "/set_reply"))
            .await
            .unwrap();
        assert_eq!(effects, vec![Effect::send_text(CHAT, "Reply set!")]);
        assert_eq!(engine.current_step(CHAT).await.unwrap().as_deref(), Some("set_reply/s1"));

        let declined = engine.dispatch(&Update::text(CHAT, 1, "reply_02")).await.unwrap();
        assert_matches!(declined, Dispatch::Declined { .. });
        assert_eq!(engine.current_step(CHAT).await.unwrap().as_deref(), Some("set_reply/s1"));

        let advanced = engine.dispatch(&Update::text(CHAT, 1, "reply_01")).await.unwrap();
        assert_eq!(
            advanced,
            Dispatch::Advanced {
                from: StepRef::new("set_reply", "s1"),
                to: StepRef::new("set_reply", "s2"),
                effects: vec![Effect::send_text(CHAT, "Reply 01")],
            }
        );

        let completed = engine.dispatch(&Update::text(CHAT, 1, "reply_02")).await.unwrap();
        assert_matches!(completed, Dispatch::Completed { .. });
        assert_eq!(completed.into_effects(), vec![Effect::send_text(CHAT, "Reply 02")]);
        assert_eq!(engine.current_step(CHAT).await.unwrap(), None);
        assert_eq!(engine.steps_executed(), 3);
    }

    #[tokio::test]
    async fn test_inactive_conversation_is_not_handled() {
        let engine = engine();
        let dispatch = engine.dispatch(&Update::text(CHAT, 1, "reply_01")).await.unwrap();
        assert_eq!(dispatch, Dispatch::Inactive);
        assert!(!dispatch.is_handled());
    }

    #[tokio::test]
    async fn test_failed_action_keeps_state() {
        let engine = FlowEngine::new("TestBot", 1, Arc::new(MemoryStateStore::new()));
        engine
            .register_flow(
                Flow::builder("fragile")
                    .root(Action::reply("go"))
                    .handler("fail", |ctx, _| Err(FlowBotError::action(ctx.location(), "backend down")))
                    .step(Step::new("a", Predicate::Always, Action::handler("fail")))
                    .step(Step::new("b", Predicate::Always, Action::reply("done")))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        engine.start("fragile", &Update::text(CHAT, 1, "/fragile")).await.unwrap();
        let result = engine.dispatch(&Update::text(CHAT, 1, "anything")).await;
        assert_matches!(result, Err(FlowBotError::Action { .. }));
        assert_eq!(engine.current_step(CHAT).await.unwrap().as_deref(), Some("fragile/a"));
    }

    #[tokio::test]
    async fn test_failed_root_action_seeds_nothing() {
        let engine = FlowEngine::new("TestBot", 1, Arc::new(MemoryStateStore::new()));
        engine
            .register_flow(
                Flow::builder("broken_root")
                    .root(Action::handler("fail"))
                    .handler("fail", |ctx, _| Err(FlowBotError::action(ctx.location(), "nope")))
                    .step(Step::new("a", Predicate::Always, Action::reply("a")))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        assert!(engine.start("broken_root", &Update::text(CHAT, 1, "/x")).await.is_err());
        assert_eq!(engine.current_step(CHAT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stale_step_is_cleared() {
        let store = Arc::new(MemoryStateStore::new());
        store.put(CHAT, "removed_flow/s1").await.unwrap();
        let engine = FlowEngine::new("TestBot", 1, store.clone());

        let dispatch = engine.dispatch(&Update::text(CHAT, 1, "hi")).await.unwrap();
        assert_eq!(dispatch, Dispatch::Stale { step_id: "removed_flow/s1".to_string() });
        assert_eq!(store.get(CHAT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_flow_registration_fails() {
        let engine = engine();
        let again = Flow::builder("set_reply").root(Action::reply("x")).build().unwrap();
        assert_matches!(engine.register_flow(again), Err(FlowBotError::InvalidFlow { .. }));
    }

    #[tokio::test]
    async fn test_restart_replaces_active_step() {
        let engine = engine();
        engine.start("set_reply", &Update::text(CHAT, 1, "/set_reply")).await.unwrap();
        engine.dispatch(&Update::text(CHAT, 1, "reply_01")).await.unwrap();
        assert_eq!(engine.current_step(CHAT).await.unwrap().as_deref(), Some("set_reply/s2"));

        engine.start("set_reply", &Update::text(CHAT, 1, "/set_reply")).await.unwrap();
        assert_eq!(engine.current_step(CHAT).await.unwrap().as_deref(), Some("set_reply/s1"));
    }

    #[tokio::test]
    async fn test_lock_table_is_pruned() {
        let engine = engine();
        engine.start("set_reply", &Update::text(CHAT, 1, "/set_reply")).await.unwrap();
        engine.dispatch(&Update::text(CHAT, 1, "reply_01")).await.unwrap();
        assert!(engine.locks.is_empty());
    }
}
