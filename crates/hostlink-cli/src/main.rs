mod host;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

use hostlink_core::config::Config;
use hostlink_core::protocol::CommandResult;
use hostlink_gateway::{register_capabilities, CommandRegistry, ServerHandle};

#[derive(Parser)]
#[command(
    name = "hostlink",
    about = "Drive a single-threaded host over HTTP and WebSocket",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway with the demo scene host
    Serve {
        /// First HTTP port to try (0 = any free port)
        #[arg(long)]
        http_port: Option<u16>,

        /// First WebSocket port to try (0 = any free port)
        #[arg(long)]
        ws_port: Option<u16>,

        /// Host tick interval in milliseconds
        #[arg(long, default_value_t = 16)]
        tick_ms: u64,
    },

    /// Send one command to a running gateway and print the result
    Send {
        /// Command name, e.g. `ping`
        command: String,

        /// Parameter as key=value; values that parse as JSON are sent as JSON
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Gateway HTTP port (default: configured base port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Check the configuration for problems
    Validate,
    /// Print the config file path
    Path,
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn init_logging(verbose: bool, config: &Config) {
    let level = if verbose {
        "debug".to_string()
    } else {
        config
            .logging
            .as_ref()
            .and_then(|l| l.level.clone())
            .unwrap_or_else(|| "info".to_string())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let json = config.logging.as_ref().is_some_and(|l| l.format == "json");
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    init_logging(cli.verbose, &config);

    match cli.command {
        Commands::Serve {
            http_port,
            ws_port,
            tick_ms,
        } => serve(config, http_port, ws_port, tick_ms).await?,
        Commands::Send {
            command,
            params,
            port,
        } => send(&config, command, params, port).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    bail!("{} configuration error(s)", errors.len());
                }
                println!("Configuration OK");
            }
            ConfigAction::Path => println!("{}", config_path.display()),
        },
    }

    Ok(())
}

async fn serve(
    mut config: Config,
    http_port: Option<u16>,
    ws_port: Option<u16>,
    tick_ms: u64,
) -> anyhow::Result<()> {
    if let Some(port) = http_port {
        config.gateway.http.base_port = port;
    }
    if let Some(port) = ws_port {
        config.gateway.websocket.base_port = port;
    }

    let (warnings, errors) = config.validate();
    for warning in warnings {
        tracing::warn!("{warning}");
    }
    if !errors.is_empty() {
        bail!("Invalid configuration:\n  {}", errors.join("\n  "));
    }

    let mut server = ServerHandle::new(config.gateway);

    let mut registry = CommandRegistry::with_builtins();
    host::register_commands(&mut registry);
    register_capabilities(&mut registry, host::capabilities());

    #[cfg(feature = "metrics")]
    {
        let handle = hostlink_gateway::metrics::install_prometheus_recorder()?;
        registry.register("get_metrics", move |_, _, _| {
            Ok(CommandResult::ok_with("Prometheus metrics", json!(handle.render())))
        });
    }

    let dispatcher = server.dispatcher(registry);
    let inbound = server.take_inbound();
    server.start().await?;

    let status = server.status();
    tracing::info!(
        http_port = ?status.http_port,
        ws_port = ?status.ws_port,
        "Hostlink gateway running; press Ctrl+C to stop"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let host_thread = std::thread::Builder::new()
        .name("hostlink-host".into())
        .spawn({
            let stop = Arc::clone(&stop);
            move || host::run(dispatcher, inbound, Duration::from_millis(tick_ms), &stop)
        })?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    stop.store(true, Ordering::SeqCst);
    server.stop().await;
    host_thread
        .join()
        .map_err(|_| anyhow!("host thread panicked"))?;
    Ok(())
}

async fn send(
    config: &Config,
    command: String,
    params: Vec<(String, Value)>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.gateway.http.base_port);
    let url = format!("http://{}:{port}/", config.gateway.bind);
    let parameters: Map<String, Value> = params.into_iter().collect();
    let envelope = json!({ "type": command, "parameters": parameters });

    let response = reqwest::Client::new()
        .post(&url)
        .json(&envelope)
        .timeout(Duration::from_millis(config.gateway.queue.timeout_ms + 1000))
        .send()
        .await
        .with_context(|| format!("is the gateway running at {url}?"))?;

    let result: CommandResult = response.json().await.context("unreadable response")?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        bail!(
            "command failed ({})",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("n=3").unwrap(), ("n".to_string(), json!(3)));
        assert_eq!(
            parse_param("name=Main Camera").unwrap(),
            ("name".to_string(), json!("Main Camera"))
        );
        assert_eq!(
            parse_param("pos=[1,2,3]").unwrap(),
            ("pos".to_string(), json!([1, 2, 3]))
        );
        assert_eq!(parse_param("empty=").unwrap().1, json!(""));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=3").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::parse_from([
            "hostlink", "send", "spawn_object", "-p", "name=Cube", "--param", "position=[0,1,0]",
        ]);
        match cli.command {
            Commands::Send { command, params, port } => {
                assert_eq!(command, "spawn_object");
                assert_eq!(params.len(), 2);
                assert_eq!(port, None);
            }
            _ => panic!("expected send"),
        }
    }
}
