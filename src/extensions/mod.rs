//! Built-in extension packages
//!
//! Packages compiled into the host and registered at startup.

pub mod say_hello;

use std::path::PathBuf;

use crate::extension::{ExtensionIdentity, ExtensionRegistry};

pub use say_hello::{SayHelloExtension, SayHelloFactory};

pub const BUILTIN_GROUP: &str = "org.flowbot";

/// Registry holding every built-in package, with shared folders under
/// `extensions_dir`
pub fn builtin_registry(extensions_dir: impl Into<PathBuf>) -> ExtensionRegistry {
    let mut registry = ExtensionRegistry::new(extensions_dir);
    registry.register(&ExtensionIdentity::new(BUILTIN_GROUP, "say-hello"), SayHelloFactory);
    registry
}
