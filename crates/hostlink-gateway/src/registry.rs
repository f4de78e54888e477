//! Command registry: maps command names to host-side handlers.

use std::collections::HashMap;

use tracing::warn;

use hostlink_core::protocol::{CommandEnvelope, CommandResult};

use crate::events::BroadcastRegistry;
use crate::state::{GatewayState, StatsSnapshot};

/// What a handler can see besides the host and its own envelope.
pub struct CommandContext<'a> {
    pub(crate) state: &'a GatewayState,
    pub(crate) commands: &'a [String],
}

impl CommandContext<'_> {
    pub fn broadcaster(&self) -> &BroadcastRegistry {
        &self.state.broadcast
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.state.stats.snapshot()
    }

    /// Names of every registered command, lowercase and sorted.
    pub fn commands(&self) -> &[String] {
        self.commands
    }
}

/// A command executed on the host thread with exclusive access to host state.
///
/// Handlers return `Err` for failures; the dispatcher turns those into
/// failure results. Any closure with the right signature is a handler.
pub trait CommandHandler<H>: Send {
    fn execute(
        &self,
        host: &mut H,
        ctx: &CommandContext<'_>,
        envelope: &CommandEnvelope,
    ) -> anyhow::Result<CommandResult>;
}

impl<H, F> CommandHandler<H> for F
where
    F: Fn(&mut H, &CommandContext<'_>, &CommandEnvelope) -> anyhow::Result<CommandResult> + Send,
{
    fn execute(
        &self,
        host: &mut H,
        ctx: &CommandContext<'_>,
        envelope: &CommandEnvelope,
    ) -> anyhow::Result<CommandResult> {
        self(host, ctx, envelope)
    }
}

/// Case-insensitive name → handler table.
pub struct CommandRegistry<H> {
    handlers: HashMap<String, Box<dyn CommandHandler<H>>>,
}

impl<H> Default for CommandRegistry<H> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<H: 'static> CommandRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with `ping`, `get_capabilities` and `get_stats`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::methods::register_builtins(&mut registry);
        registry
    }

    /// Register a closure. Replaces any handler already bound to `name`.
    pub fn register<F>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(&mut H, &CommandContext<'_>, &CommandEnvelope) -> anyhow::Result<CommandResult>
            + Send
            + 'static,
    {
        self.register_handler(name, handler)
    }

    pub fn register_handler(
        &mut self,
        name: &str,
        handler: impl CommandHandler<H> + 'static,
    ) -> &mut Self {
        let key = name.trim().to_ascii_lowercase();
        if self.handlers.insert(key, Box::new(handler)).is_some() {
            warn!(command = name, "Replacing existing command handler");
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn CommandHandler<H>> {
        self.handlers
            .get(&name.trim().to_ascii_lowercase())
            .map(|h| h.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut registry = CommandRegistry::<()>::new();
        registry.register("Spawn_Cube", |_, _, _| Ok(CommandResult::ok("spawned")));
        assert!(registry.contains("spawn_cube"));
        assert!(registry.contains("SPAWN_CUBE"));
        assert!(!registry.contains("spawn"));
        assert_eq!(registry.names(), vec!["spawn_cube"]);
    }

    #[test]
    fn test_reregister_replaces() {
        let mut registry = CommandRegistry::<u32>::new();
        registry.register("bump", |n, _, _| {
            *n += 1;
            Ok(CommandResult::ok("one"))
        });
        registry.register("BUMP", |n, _, _| {
            *n += 10;
            Ok(CommandResult::ok("ten"))
        });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_builtins_present() {
        let registry = CommandRegistry::<()>::with_builtins();
        for name in ["ping", "get_capabilities", "get_stats"] {
            assert!(registry.contains(name), "{name}");
        }
    }
}
