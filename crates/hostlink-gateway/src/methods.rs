//! Built-in commands.

use std::sync::Arc;

use serde_json::json;

use hostlink_core::capability::{CapabilityError, CapabilityTable};
use hostlink_core::marshal::MarshalError;
use hostlink_core::protocol::{codes, CommandEnvelope, CommandResult};

use crate::registry::{CommandContext, CommandRegistry};

pub const SERVER_NAME: &str = "Hostlink";

/// Register `ping`, `get_capabilities` and `get_stats`.
pub fn register_builtins<H: 'static>(registry: &mut CommandRegistry<H>) {
    registry
        .register("ping", |_, _, _| Ok(CommandResult::ok("Pong! Server is alive!")))
        .register("get_capabilities", |_, ctx, _| Ok(handle_capabilities(ctx)))
        .register("get_stats", |_, ctx, _| Ok(handle_stats(ctx)));
}

fn handle_capabilities(ctx: &CommandContext<'_>) -> CommandResult {
    CommandResult::ok_with(
        "Server capabilities",
        json!({
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "commands": ctx.commands(),
        }),
    )
}

fn handle_stats(ctx: &CommandContext<'_>) -> CommandResult {
    let stats = ctx.stats();
    CommandResult::ok_with(
        "Server statistics",
        json!({
            "connections_current": ctx.broadcaster().len(),
            "connections_total": stats.connections_total,
            "commands_processed": stats.commands_processed,
            "commands_failed": stats.commands_failed,
            "uptime_seconds": stats.uptime_seconds,
            "uptime_formatted": stats.uptime_formatted,
        }),
    )
}

/// Register `get_property`, `set_property` and `list_properties` over `table`.
pub fn register_capabilities<H: 'static>(
    registry: &mut CommandRegistry<H>,
    table: CapabilityTable<H>,
) {
    let table = Arc::new(table);

    let get_table = Arc::clone(&table);
    let set_table = Arc::clone(&table);
    let list_table = table;

    registry
        .register("get_property", move |host, _, env| {
            let name: String = env.param("name")?;
            Ok(match get_table.get(host, &name) {
                Ok(value) => CommandResult::ok_with(
                    format!("Read {name}"),
                    json!({ "name": name, "shape": value.shape(), "value": value.to_json() }),
                ),
                Err(e) => capability_failure(e),
            })
        })
        .register("set_property", move |host, _, env| {
            let name: String = env.param("name")?;
            let raw = value_param(env)?;
            Ok(match set_table.set(host, &name, raw) {
                Ok(value) => CommandResult::ok_with(
                    format!("Set {name}"),
                    json!({ "name": name, "shape": value.shape(), "value": value.to_json() }),
                ),
                Err(e) => capability_failure(e),
            })
        })
        .register("list_properties", move |_, _, _| {
            let properties = list_table.list();
            Ok(CommandResult::ok_with(
                format!("{} properties", properties.len()),
                json!({ "properties": properties }),
            ))
        });
}

fn value_param(env: &CommandEnvelope) -> Result<&serde_json::Value, MarshalError> {
    env.parameters()
        .get("value")
        .ok_or_else(|| MarshalError::Missing("value".to_string()))
}

fn capability_failure(e: CapabilityError) -> CommandResult {
    let code = match e {
        CapabilityError::Marshal { .. } => codes::INVALID_PARAMS,
        CapabilityError::Unknown(_) | CapabilityError::ReadOnly(_) => codes::HANDLER_ERROR,
    };
    CommandResult::failure(e.to_string(), code)
}
