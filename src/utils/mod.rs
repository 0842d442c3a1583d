//! Utility modules
//!
//! This module contains common utilities used throughout the host,
//! including error handling, logging and metrics setup, and bot account
//! helpers.

pub mod accounts;
pub mod errors;
pub mod logging;
pub mod metrics;

pub use errors::{FlowBotError, Result};
