//! # Heartbeat
//!
//! Counted-retry liveness checking for Active connections.
//!
//! Every interval the monitor arms a fresh nonce and sends a `RYST` probe, then checks
//! up to `max_attempts` times, one tick apart, whether the read loop has seen the
//! matching `ALIV` reply. A probe that stays unanswered evicts the connection.
//!
//! The read loop never blocks on the monitor: it only flips the [`Liveness`] flag when a
//! reply arrives, and answers the peer's own probes immediately.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::config::HeartbeatConfig;
use crate::protocol::message::Probe;
use crate::service::connection::Connection;
use crate::service::pool::ConnectionPool;

/// Probe/reply state shared by a connection's read loop and its monitor.
#[derive(Debug, Default)]
pub struct Liveness {
    expected: AtomicU32,
    awaiting: AtomicBool,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a probe cycle and return the nonce to send.
    pub fn arm(&self) -> u32 {
        let nonce = rand::random::<u32>();
        self.expected.store(nonce, Ordering::SeqCst);
        self.awaiting.store(true, Ordering::SeqCst);
        nonce
    }

    /// Record a reply; returns whether it answered the current probe.
    pub fn observe(&self, nonce: u32) -> bool {
        if self.awaiting.load(Ordering::SeqCst) && self.expected.load(Ordering::SeqCst) == nonce {
            self.awaiting.store(false, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn answered(&self) -> bool {
        !self.awaiting.load(Ordering::SeqCst)
    }
}

pub struct HeartbeatMonitor {
    connection: Connection,
    pool: ConnectionPool,
    config: HeartbeatConfig,
}

impl HeartbeatMonitor {
    pub fn new(connection: Connection, pool: ConnectionPool, config: HeartbeatConfig) -> Self {
        Self {
            connection,
            pool,
            config,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Probe until the connection closes or a probe goes unanswered.
    pub async fn run(self) {
        let conn = &self.connection;
        loop {
            tokio::select! {
                _ = conn.closed() => return,
                _ = sleep(self.config.interval) => {}
            }

            let nonce = conn.liveness().arm();
            if let Err(e) = conn.send(&Probe { nonce }).await {
                debug!(peer = ?conn.peer_id(), error = %e, "Heartbeat probe not sent");
                return;
            }
            trace!(peer = ?conn.peer_id(), nonce, "Heartbeat probe sent");

            if !self.await_reply().await {
                if conn.is_closed() {
                    return;
                }
                warn!(
                    peer = ?conn.peer_id(),
                    attempts = self.config.max_attempts,
                    "Peer missed heartbeat, evicting connection"
                );
                self.pool.metrics().heartbeat_timeout();
                self.pool.evict(conn);
                return;
            }
        }
    }

    async fn await_reply(&self) -> bool {
        let conn = &self.connection;
        for _ in 0..self.config.max_attempts {
            tokio::select! {
                _ = conn.closed() => return false,
                _ = sleep(self.config.tick) => {}
            }
            if conn.liveness().answered() {
                return true;
            }
        }
        false
    }
}
