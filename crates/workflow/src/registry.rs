//! Typed command registry.
//!
//! Replaces call-time reflection with a startup-time mapping: a stable string
//! key resolves to a factory carrying its declared parameter names and an
//! invoke closure that builds the typed command from process variables and
//! routes it. Workflow definitions stay decoupled from command types while
//! the mapping itself is type-checked.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use provigate_core::ExecutionContext;

use crate::engine::Variables;
use crate::error::DispatchFailure;

/// Boxed future returned by an invoke closure.
pub type InvokeFuture = Pin<Box<dyn Future<Output = Result<(), DispatchFailure>> + Send + 'static>>;

type InvokeFn = Arc<dyn Fn(ExecutionContext, Variables) -> InvokeFuture + Send + Sync>;

/// One registered command: declared parameters plus the invoke closure.
#[derive(Clone)]
pub struct CommandEntry {
    parameters: Vec<String>,
    invoke: InvokeFn,
}

impl CommandEntry {
    /// Constructor-parameter names this command requires.
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Build the command from the collected variables and dispatch it.
    pub fn invoke(&self, ctx: ExecutionContext, params: Variables) -> InvokeFuture {
        (self.invoke)(ctx, params)
    }
}

impl core::fmt::Debug for CommandEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandEntry")
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// Stable command key → factory, resolved at startup.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    entries: HashMap<String, CommandEntry>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command factory under a stable key.
    ///
    /// Later registrations under the same key replace earlier ones; wiring
    /// happens once at startup, so this is a configuration choice, not a
    /// runtime race.
    pub fn register<F>(&mut self, key: impl Into<String>, parameters: &[&str], invoke: F)
    where
        F: Fn(ExecutionContext, Variables) -> InvokeFuture + Send + Sync + 'static,
    {
        self.entries.insert(
            key.into(),
            CommandEntry {
                parameters: parameters.iter().map(|p| p.to_string()).collect(),
                invoke: Arc::new(invoke),
            },
        );
    }

    pub fn entry(&self, key: &str) -> Option<&CommandEntry> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
