//! Gateway shared state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use hostlink_core::config::GatewayConfig;
use hostlink_core::protocol::{codes, CommandEnvelope, CommandResult};

use crate::events::{BroadcastRegistry, InboundMessage};
use crate::queue::ExecutionQueue;

/// Shared gateway state accessible from all connections and the host tick.
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    pub queue: ExecutionQueue,
    pub broadcast: BroadcastRegistry,
    pub stats: ServerStats,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> (Self, mpsc::UnboundedReceiver<InboundMessage>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let queue = ExecutionQueue::new(
            config.queue.capacity,
            Duration::from_millis(config.queue.timeout_ms),
        );
        let state = Self {
            config: Arc::new(config),
            queue,
            broadcast: BroadcastRegistry::new(),
            stats: ServerStats::new(),
            inbound_tx,
        };
        (state, inbound_rx)
    }

    /// Run a command on the host and wait for its result.
    ///
    /// Failures that never reach the host (queue full, timeout) are counted
    /// here; everything else is counted by the dispatcher.
    pub async fn execute(&self, envelope: CommandEnvelope) -> CommandResult {
        let result = self.queue.enqueue(envelope).await;
        if matches!(
            result.error.as_deref(),
            Some(codes::TIMEOUT) | Some(codes::QUEUE_FULL)
        ) {
            self.stats.record_command(false);
            #[cfg(feature = "metrics")]
            crate::metrics::record_error(result.error.as_deref().unwrap_or("unknown"));
        }
        result
    }

    /// Hand a client message to the host. Dropped silently once the receiver is gone.
    pub(crate) fn deliver_inbound(&self, message: InboundMessage) {
        if self.inbound_tx.send(message).is_err() {
            trace!("Inbound receiver dropped; discarding message");
        }
    }
}

/// Connection and command counters.
#[derive(Debug)]
pub struct ServerStats {
    started_at: Instant,
    connections_total: AtomicU64,
    commands_processed: AtomicU64,
    commands_failed: AtomicU64,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            connections_total: AtomicU64::new(0),
            commands_processed: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
        }
    }

    pub fn record_connection(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command(&self, success: bool) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let uptime = self.uptime().as_secs();
        StatsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            commands_processed: self.commands_processed.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            uptime_seconds: uptime,
            uptime_formatted: format_uptime(uptime),
        }
    }
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub connections_total: u64,
    pub commands_processed: u64,
    pub commands_failed: u64,
    pub uptime_seconds: u64,
    pub uptime_formatted: String,
}

/// `3725` → `"1h 2m 5s"`.
pub fn format_uptime(secs: u64) -> String {
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}
