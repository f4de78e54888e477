//! Port negotiation.
//!
//! Each listener scans a contiguous window of candidate ports and keeps the
//! first one it can bind. The bound listener itself is the lease, so there is
//! no gap between probing a port and serving on it.

use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PortError {
    #[error(
        "no free port on {bind} in {first}..={last} after {attempts} attempt(s){}",
        held_by(.owner_hint)
    )]
    Exhausted {
        bind: String,
        first: u16,
        last: u16,
        attempts: u32,
        owner_hint: Option<String>,
    },

    #[error("port range must contain at least one port")]
    InvalidRange,
}

fn held_by(hint: &Option<String>) -> String {
    hint.as_ref()
        .map(|h| format!("; first port held by {h}"))
        .unwrap_or_default()
}

/// A bound listener and the port it holds.
#[derive(Debug)]
pub struct PortLease {
    pub port: u16,
    pub listener: TcpListener,
}

/// Finds a free port within `[base, base + range)`, retrying whole scans.
#[derive(Debug, Clone)]
pub struct PortNegotiator {
    bind: String,
    base: u16,
    range: u16,
    max_retries: u32,
    retry_delay: Duration,
}

impl PortNegotiator {
    pub fn new(bind: impl Into<String>, base: u16, range: u16) -> Self {
        Self {
            bind: bind.into(),
            base,
            range,
            max_retries: 0,
            retry_delay: Duration::ZERO,
        }
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Candidate ports in scan order. A base of 0 asks the OS for any free port.
    pub fn candidates(&self) -> Vec<u16> {
        if self.base == 0 {
            return vec![0];
        }
        (0..self.range)
            .map_while(|offset| self.base.checked_add(offset))
            .collect()
    }

    pub async fn acquire(&self) -> Result<PortLease, PortError> {
        let candidates = self.candidates();
        let (Some(&first), Some(&last)) = (candidates.first(), candidates.last()) else {
            return Err(PortError::InvalidRange);
        };

        let attempts = self.max_retries + 1;
        for attempt in 1..=attempts {
            for &port in &candidates {
                match TcpListener::bind((self.bind.as_str(), port)).await {
                    Ok(listener) => {
                        let port = listener.local_addr().map(|a| a.port()).unwrap_or(port);
                        info!(bind = %self.bind, port, attempt, "Port acquired");
                        return Ok(PortLease { port, listener });
                    }
                    Err(e) => debug!(bind = %self.bind, port, %e, "Port unavailable"),
                }
            }

            if attempt < attempts {
                warn!(
                    bind = %self.bind,
                    first,
                    last,
                    attempt,
                    retry_in_ms = self.retry_delay.as_millis() as u64,
                    "All candidate ports busy; retrying"
                );
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(PortError::Exhausted {
            bind: self.bind.clone(),
            first,
            last,
            attempts,
            owner_hint: owner_hint(first),
        })
    }
}

/// Best-effort description of the process listening on `port`.
#[cfg(target_os = "linux")]
pub fn owner_hint(port: u16) -> Option<String> {
    let inode = listening_inode(port)?;
    let pid = pid_holding_inode(inode)?;
    let name = std::fs::read_to_string(format!("/proc/{pid}/comm"))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    Some(format!("{name} (pid {pid})"))
}

#[cfg(not(target_os = "linux"))]
pub fn owner_hint(_port: u16) -> Option<String> {
    None
}

#[cfg(target_os = "linux")]
fn listening_inode(port: u16) -> Option<u64> {
    let suffix = format!(":{port:04X}");
    ["/proc/net/tcp", "/proc/net/tcp6"]
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .find_map(|table| {
            table.lines().skip(1).find_map(|line| {
                let cols: Vec<&str> = line.split_whitespace().collect();
                // 0A = LISTEN
                if cols.len() < 10 || cols[3] != "0A" || !cols[1].ends_with(&suffix) {
                    return None;
                }
                cols[9].parse().ok().filter(|inode| *inode != 0)
            })
        })
}

#[cfg(target_os = "linux")]
fn pid_holding_inode(inode: u64) -> Option<u32> {
    let needle = format!("socket:[{inode}]");
    for entry in std::fs::read_dir("/proc").ok()?.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            if std::fs::read_link(fd.path()).is_ok_and(|t| t.to_string_lossy() == needle) {
                return Some(pid);
            }
        }
    }
    None
}
