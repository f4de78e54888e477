//! Server handle: owns both listeners and their lifecycle.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hostlink_core::config::GatewayConfig;

use crate::connection::handle_ws_connection;
use crate::dispatch::Dispatcher;
use crate::error::GatewayError;
use crate::events::{BroadcastRegistry, InboundMessage};
use crate::http::handle_http_connection;
use crate::port::{PortError, PortNegotiator};
use crate::registry::CommandRegistry;
use crate::state::{GatewayState, StatsSnapshot};

/// Pause after a failed `accept` so a persistent error (e.g. fd exhaustion) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Http,
    WebSocket,
}

impl Transport {
    fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::WebSocket => "websocket",
        }
    }
}

struct Listener {
    port: u16,
    task: JoinHandle<()>,
}

struct Running {
    shutdown: CancellationToken,
    http: Option<Listener>,
    ws: Option<Listener>,
}

/// Current server status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub running: bool,
    pub http_port: Option<u16>,
    pub ws_port: Option<u16>,
    pub connections: usize,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

/// Starts, stops and reports on the HTTP and WebSocket listeners.
///
/// The handle shares its queue, statistics and broadcast registry with every
/// [`Dispatcher`] it creates, so a host can keep ticking across restarts.
pub struct ServerHandle {
    state: Arc<GatewayState>,
    inbound: Option<mpsc::UnboundedReceiver<InboundMessage>>,
    running: Option<Running>,
}

impl ServerHandle {
    pub fn new(config: GatewayConfig) -> Self {
        let (state, inbound) = GatewayState::new(config);
        Self {
            state: Arc::new(state),
            inbound: Some(inbound),
            running: None,
        }
    }

    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    /// Build the host-side dispatcher for `registry`.
    pub fn dispatcher<H: 'static>(&self, registry: CommandRegistry<H>) -> Dispatcher<H> {
        Dispatcher::new(registry, Arc::clone(&self.state))
    }

    pub fn broadcaster(&self) -> BroadcastRegistry {
        self.state.broadcast.clone()
    }

    /// Take the receiver for client text messages. Only the first call gets it.
    ///
    /// Messages accumulate until it is taken; take and drop it to discard them.
    pub fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        self.inbound.take()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Negotiate ports and start accepting. No-op when already running.
    ///
    /// Succeeds if at least one enabled transport came up; a transport that
    /// could not get a port is logged and left down.
    pub async fn start(&mut self) -> Result<(), GatewayError> {
        if self.running.is_some() {
            debug!("Server already running");
            return Ok(());
        }

        let config = Arc::clone(&self.state.config);
        let shutdown = CancellationToken::new();
        let mut first_error: Option<PortError> = None;

        let http = if config.http.enabled {
            let negotiator = negotiator(&config, config.http.base_port, config.http.range_size);
            match negotiator.acquire().await {
                Ok(lease) => {
                    let state = Arc::clone(&self.state);
                    let task = spawn_accept_loop(
                        Transport::Http,
                        lease.listener,
                        shutdown.clone(),
                        move |stream, peer| {
                            handle_http_connection(Arc::clone(&state), stream, peer)
                        },
                    );
                    info!(bind = %config.bind, port = lease.port, "HTTP listener started");
                    Some(Listener {
                        port: lease.port,
                        task,
                    })
                }
                Err(e) => {
                    error!(%e, "HTTP listener failed to start");
                    first_error.get_or_insert(e);
                    None
                }
            }
        } else {
            None
        };

        let ws = if config.websocket.enabled {
            let negotiator = negotiator(
                &config,
                config.websocket.base_port,
                config.websocket.range_size,
            );
            match negotiator.acquire().await {
                Ok(lease) => {
                    let state = Arc::clone(&self.state);
                    let token = shutdown.clone();
                    let task = spawn_accept_loop(
                        Transport::WebSocket,
                        lease.listener,
                        shutdown.clone(),
                        move |stream, peer| {
                            let shutdown = token.child_token();
                            handle_ws_connection(Arc::clone(&state), stream, peer, shutdown)
                        },
                    );
                    info!(bind = %config.bind, port = lease.port, "WebSocket listener started");
                    Some(Listener {
                        port: lease.port,
                        task,
                    })
                }
                Err(e) => {
                    error!(%e, "WebSocket listener failed to start");
                    first_error.get_or_insert(e);
                    None
                }
            }
        } else {
            None
        };

        if http.is_none() && ws.is_none() {
            if let Some(e) = first_error {
                return Err(e.into());
            }
            warn!("Both transports are disabled; nothing to serve");
        }

        self.running = Some(Running { shutdown, http, ws });
        Ok(())
    }

    /// Stop both listeners and close every WebSocket connection. No-op when stopped.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.shutdown.cancel();
        let closed = self.state.broadcast.close_all();

        let grace = Duration::from_millis(self.state.config.shutdown_timeout_ms);
        for listener in [running.http, running.ws].into_iter().flatten() {
            let abort = listener.task.abort_handle();
            if tokio::time::timeout(grace, listener.task).await.is_err() {
                warn!(port = listener.port, "Listener did not stop in time; aborting");
                abort.abort();
            }
        }

        info!(closed_connections = closed, "Server stopped");
    }

    pub async fn restart(&mut self) -> Result<(), GatewayError> {
        self.stop().await;
        self.start().await
    }

    pub fn status(&self) -> ServerStatus {
        let running = self.running.as_ref();
        ServerStatus {
            running: running.is_some(),
            http_port: running.and_then(|r| r.http.as_ref()).map(|l| l.port),
            ws_port: running.and_then(|r| r.ws.as_ref()).map(|l| l.port),
            connections: self.state.broadcast.len(),
            stats: self.state.stats.snapshot(),
        }
    }
}

fn negotiator(config: &GatewayConfig, base: u16, range: u16) -> PortNegotiator {
    PortNegotiator::new(config.bind.clone(), base, range).with_retries(
        config.ports.max_retries,
        Duration::from_millis(config.ports.retry_delay_ms),
    )
}

fn spawn_accept_loop<F, Fut>(
    transport: Transport,
    listener: TcpListener,
    shutdown: CancellationToken,
    handler: F,
) -> JoinHandle<()>
where
    F: Fn(TcpStream, SocketAddr) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(transport = transport.as_str(), %peer, "Accepted connection");
                        tokio::spawn(handler(stream, peer));
                    }
                    Err(e) => {
                        warn!(transport = transport.as_str(), %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
        debug!(transport = transport.as_str(), "Accept loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ephemeral_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.http.base_port = 0;
        config.websocket.base_port = 0;
        config
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let mut server = ServerHandle::new(ephemeral_config());
        assert!(!server.status().running);

        server.start().await.unwrap();
        let first = server.status();
        assert!(first.running);
        assert!(first.http_port.is_some());
        assert!(first.ws_port.is_some());

        server.start().await.unwrap();
        assert_eq!(server.status().http_port, first.http_port);

        server.stop().await;
        server.stop().await;
        let stopped = server.status();
        assert!(!stopped.running);
        assert_eq!(stopped.http_port, None);
    }

    #[tokio::test]
    async fn test_one_transport_failing_still_starts() {
        let held = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = held.local_addr().unwrap().port();

        let mut config = ephemeral_config();
        config.websocket.base_port = taken;
        config.websocket.range_size = 1;
        config.ports.max_retries = 0;

        let mut server = ServerHandle::new(config);
        server.start().await.unwrap();
        let status = server.status();
        assert!(status.running);
        assert!(status.http_port.is_some());
        assert_eq!(status.ws_port, None);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_both_transports_failing_is_an_error() {
        let held = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = held.local_addr().unwrap().port();

        let mut config = GatewayConfig::default();
        config.http.base_port = taken;
        config.http.range_size = 1;
        config.websocket.base_port = taken;
        config.websocket.range_size = 1;
        config.ports.max_retries = 0;

        let mut server = ServerHandle::new(config);
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, GatewayError::Port(PortError::Exhausted { .. })));
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_take_inbound_once() {
        let mut server = ServerHandle::new(ephemeral_config());
        assert!(server.take_inbound().is_some());
        assert!(server.take_inbound().is_none());
    }
}
