//! State management module
//!
//! This module handles conversation flows and their persisted progress

pub mod context;
pub mod engine;
pub mod flow;
pub mod locks;
pub mod storage;

// Re-export commonly used state components
pub use context::{Effect, FlowContext, Update};
pub use engine::{Dispatch, FlowEngine};
pub use flow::{Action, ActionHandler, Flow, FlowBuilder, Predicate, Step, StepRef};
pub use locks::{ConversationGuard, ConversationLocks};
pub use storage::{open_state_store, FileStateStore, MemoryStateStore, RedisStateStore, StateStore};
