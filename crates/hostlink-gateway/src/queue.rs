//! Hand-off between network tasks and the host tick.
//!
//! Network tasks push a [`PendingInvocation`] and await its completion; the
//! host thread drains the queue on each tick and completes every item. A
//! caller that gives up (timeout) drops its receiver, and the late result is
//! discarded when the host eventually completes it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use hostlink_core::protocol::{codes, CommandEnvelope, CommandResult};

/// One queued command and the channel its result goes back on.
#[derive(Debug)]
pub struct PendingInvocation {
    pub envelope: CommandEnvelope,
    pub enqueued_at: Instant,
    completion: oneshot::Sender<CommandResult>,
}

impl PendingInvocation {
    /// Deliver the result. Returns false if the caller already gave up.
    pub fn complete(self, result: CommandResult) -> bool {
        let delivered = self.completion.send(result).is_ok();
        if !delivered {
            debug!(
                command = self.envelope.name(),
                waited_ms = self.enqueued_at.elapsed().as_millis() as u64,
                "Caller gone; discarding late result"
            );
        }
        delivered
    }
}

/// Multi-producer queue drained by a single consumer, bounded in length.
#[derive(Debug)]
pub struct ExecutionQueue {
    items: Mutex<VecDeque<PendingInvocation>>,
    capacity: usize,
    timeout: Duration,
}

impl ExecutionQueue {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PendingInvocation>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Queue an envelope and return the receiver for its result.
    pub fn push(
        &self,
        envelope: CommandEnvelope,
    ) -> Result<oneshot::Receiver<CommandResult>, CommandResult> {
        let (completion, rx) = oneshot::channel();
        let mut items = self.lock();
        if items.len() >= self.capacity {
            warn!(
                command = envelope.name(),
                capacity = self.capacity,
                "Execution queue full"
            );
            return Err(CommandResult::failure(
                format!("Execution queue is full ({} pending)", items.len()),
                codes::QUEUE_FULL,
            ));
        }
        items.push_back(PendingInvocation {
            envelope,
            enqueued_at: Instant::now(),
            completion,
        });
        Ok(rx)
    }

    /// Queue an envelope and wait for the host to run it, up to the default timeout.
    pub async fn enqueue(&self, envelope: CommandEnvelope) -> CommandResult {
        self.enqueue_with_timeout(envelope, self.timeout).await
    }

    pub async fn enqueue_with_timeout(
        &self,
        envelope: CommandEnvelope,
        timeout: Duration,
    ) -> CommandResult {
        let name = envelope.name().to_string();
        let mut rx = match self.push(envelope) {
            Ok(rx) => rx,
            Err(full) => return full,
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => CommandResult::failure(
                format!("Command '{name}' was dropped before it ran"),
                codes::HANDLER_ERROR,
            ),
            Err(_) => {
                // Closing first makes a later `complete` report the caller as gone.
                rx.close();
                if let Ok(result) = rx.try_recv() {
                    return result;
                }
                warn!(
                    command = %name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Command timed out waiting for the host"
                );
                CommandResult::failure(
                    format!(
                        "Command '{name}' timed out after {}ms",
                        timeout.as_millis()
                    ),
                    codes::TIMEOUT,
                )
            }
        }
    }

    /// Take everything currently queued, in arrival order.
    pub fn drain(&self) -> Vec<PendingInvocation> {
        self.lock().drain(..).collect()
    }
}
