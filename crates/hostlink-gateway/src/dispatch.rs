//! Host-side command execution.
//!
//! The [`Dispatcher`] is owned by whichever thread owns the host state. Each
//! call to [`Dispatcher::tick`] drains the execution queue and runs every
//! pending command in arrival order, completing each caller exactly once.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use hostlink_core::marshal::MarshalError;
use hostlink_core::protocol::{codes, CommandEnvelope, CommandResult};

use crate::registry::{CommandContext, CommandRegistry};
use crate::state::GatewayState;

pub struct Dispatcher<H> {
    registry: CommandRegistry<H>,
    commands: Vec<String>,
    state: Arc<GatewayState>,
}

impl<H: 'static> Dispatcher<H> {
    pub fn new(registry: CommandRegistry<H>, state: Arc<GatewayState>) -> Self {
        let commands = registry.names();
        Self {
            registry,
            commands,
            state,
        }
    }

    pub fn registry(&self) -> &CommandRegistry<H> {
        &self.registry
    }

    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    /// Run everything queued so far. Returns how many commands ran.
    pub fn tick(&self, host: &mut H) -> usize {
        let pending = self.state.queue.drain();
        let count = pending.len();
        for invocation in pending {
            let started = Instant::now();
            let result = self.run(host, &invocation.envelope);
            let elapsed = started.elapsed();
            let name = invocation.envelope.name().to_string();
            let outcome = Outcome::of(&result);
            // A caller that timed out has already been counted.
            if invocation.complete(result) {
                self.record(&name, &outcome, elapsed);
            }
        }
        count
    }

    /// Run one envelope immediately on the calling thread.
    pub fn dispatch(&self, host: &mut H, envelope: &CommandEnvelope) -> CommandResult {
        let started = Instant::now();
        let result = self.run(host, envelope);
        self.record(envelope.name(), &Outcome::of(&result), started.elapsed());
        result
    }

    fn run(&self, host: &mut H, envelope: &CommandEnvelope) -> CommandResult {
        let name = envelope.name();

        match self.registry.get(name) {
            None => {
                warn!(command = name, "Unknown command");
                CommandResult::unknown_command(name)
            }
            Some(handler) => {
                let ctx = CommandContext {
                    state: &self.state,
                    commands: &self.commands,
                };
                match catch_unwind(AssertUnwindSafe(|| handler.execute(host, &ctx, envelope))) {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => handler_failure(name, e),
                    Err(panic) => {
                        let reason = panic_message(panic.as_ref());
                        error!(command = name, %reason, "Command handler panicked");
                        CommandResult::failure(
                            format!("Command '{name}' panicked: {reason}"),
                            codes::HANDLER_PANIC,
                        )
                    }
                }
            }
        }
    }

    fn record(&self, name: &str, outcome: &Outcome, elapsed: Duration) {
        self.state.stats.record_command(outcome.success);
        debug!(
            command = name,
            success = outcome.success,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Command dispatched"
        );
        #[cfg(feature = "metrics")]
        {
            crate::metrics::record_request(name, elapsed.as_secs_f64());
            if let Some(code) = outcome.error.as_deref() {
                crate::metrics::record_error(code);
            }
        }
    }
}

struct Outcome {
    success: bool,
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    error: Option<String>,
}

impl Outcome {
    fn of(result: &CommandResult) -> Self {
        Self {
            success: result.success,
            error: result.error.clone(),
        }
    }
}

fn handler_failure(name: &str, e: anyhow::Error) -> CommandResult {
    if let Some(marshal) = e.downcast_ref::<MarshalError>() {
        debug!(command = name, error = %marshal, "Invalid command parameters");
        return CommandResult::failure(marshal.to_string(), codes::INVALID_PARAMS);
    }
    warn!(command = name, error = %e, "Command failed");
    CommandResult::failure(format!("{e:#}"), codes::HANDLER_ERROR)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
