//! # Connection
//!
//! One TCP link to one peer.
//!
//! The socket is split: a framed reader is owned by the read-loop task, a framed writer
//! sits behind an async mutex so concurrent senders never interleave bytes.
//!
//! ## Lifecycle
//! ```text
//! Unidentified --activate--> Active --close--> Closed
//!      |                                         ^
//!      +------------------close------------------+
//! ```
//! Closing is idempotent. It cancels the read loop's pending read, and the loop's exit
//! path deregisters the connection and shuts the write side down.

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::TransportConfig;
use crate::core::attribute::{self, PacketObject};
use crate::core::codec::PacketCodec;
use crate::core::packet::{NodeId, Packet};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::heartbeat::Liveness;
use crate::protocol::message::{self, Ack, Hello, Probe, ProbeReply};
use crate::service::directory::Node;
use crate::service::pool::ConnectionPool;
use crate::utils::metrics::Metrics;
use crate::utils::timeout::with_timeout_error;

/// Inbound half of a connection's socket
pub type PacketReader = FramedRead<OwnedReadHalf, PacketCodec>;

type PacketWriter = FramedWrite<OwnedWriteHalf, PacketCodec>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Socket open, peer id unknown
    Unidentified = 0,
    /// Peer identified and routable
    Active = 1,
    /// Terminal
    Closed = 2,
}

/// Which end opened the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted by this node's listener
    Inbound,
    /// Dialed by this node
    Outbound,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Unidentified,
            1 => ConnectionState::Active,
            _ => ConnectionState::Closed,
        }
    }
}

struct Inner {
    local_id: NodeId,
    remote_addr: SocketAddr,
    direction: Direction,
    peer: RwLock<Option<Node>>,
    state: AtomicU8,
    writer: Mutex<PacketWriter>,
    cancel: CancellationToken,
    liveness: Liveness,
    default_ttl: u8,
    send_timeout: Duration,
    metrics: Arc<Metrics>,
}

/// Shared handle to a peer link; clones refer to the same socket.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Wrap a freshly accepted or dialed socket. The connection starts Unidentified.
    pub fn new(
        stream: TcpStream,
        remote_addr: SocketAddr,
        direction: Direction,
        local_id: NodeId,
        transport: &TransportConfig,
        metrics: Arc<Metrics>,
    ) -> (Self, PacketReader) {
        let (read_half, write_half) = stream.into_split();
        let conn = Self {
            inner: Arc::new(Inner {
                local_id,
                remote_addr,
                direction,
                peer: RwLock::new(None),
                state: AtomicU8::new(ConnectionState::Unidentified as u8),
                writer: Mutex::new(FramedWrite::new(write_half, PacketCodec)),
                cancel: CancellationToken::new(),
                liveness: Liveness::new(),
                default_ttl: transport.default_ttl,
                send_timeout: transport.send_timeout,
                metrics,
            }),
        };
        (conn, FramedRead::new(read_half, PacketCodec))
    }

    /// Bind the peer identity and make the connection routable.
    ///
    /// Returns `false` if the connection was already closed or active.
    pub fn activate(&self, node: Node) -> bool {
        self.set_peer(node);
        let promoted = self
            .inner
            .state
            .compare_exchange(
                ConnectionState::Unidentified as u8,
                ConnectionState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if promoted {
            self.inner.metrics.connection_activated();
            debug!(peer = node.id, remote = %self.inner.remote_addr, "Connection active");
        }
        promoted
    }

    pub(crate) fn set_peer(&self, node: Node) {
        *self.inner.peer.write() = Some(node);
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    pub fn peer(&self) -> Option<Node> {
        *self.inner.peer.read()
    }

    pub fn peer_id(&self) -> Option<NodeId> {
        self.peer().map(|node| node.id)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    pub fn local_id(&self) -> NodeId {
        self.inner.local_id
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// Whether this is the link kept when both nodes dial each other: the one dialed by
    /// the lower id.
    pub fn is_preferred(&self) -> bool {
        match (self.peer_id(), self.inner.direction) {
            (Some(peer), Direction::Outbound) => self.inner.local_id < peer,
            (Some(peer), Direction::Inbound) => peer < self.inner.local_id,
            (None, _) => false,
        }
    }

    pub(crate) fn liveness(&self) -> &Liveness {
        &self.inner.liveness
    }

    /// Whether both handles refer to the same link.
    pub fn same(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Send a payload object to the peer.
    pub async fn send<T: PacketObject>(&self, value: &T) -> Result<()> {
        let peer = self
            .peer_id()
            .ok_or_else(|| ProtocolError::Routing(constants::ERR_PEER_UNIDENTIFIED.into()))?;
        self.send_object_to(peer, value).await
    }

    /// Originate a packet from this node toward `destination` over this link.
    pub async fn send_object_to<T: PacketObject>(
        &self,
        destination: NodeId,
        value: &T,
    ) -> Result<()> {
        let payload = attribute::serialize(value)?;
        let packet = Packet::originate(
            T::packet_type(),
            self.inner.default_ttl,
            self.inner.local_id,
            destination,
            payload,
        );
        self.send_packet(packet).await
    }

    /// Transmit a packet unchanged.
    ///
    /// Size limits are checked before the writer is touched. A write failure closes
    /// the connection.
    pub async fn send_packet(&self, packet: Packet) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        packet.validate()?;
        let len = packet.encoded_len() as u64;

        let result = {
            let mut writer = self.inner.writer.lock().await;
            with_timeout_error(writer.send(packet), self.inner.send_timeout).await
        };

        match result {
            Ok(()) => {
                self.inner.metrics.packet_sent(len);
                Ok(())
            }
            Err(e) => {
                warn!(remote = %self.inner.remote_addr, error = %e, "Send failed, closing connection");
                self.close();
                Err(e)
            }
        }
    }

    /// Move to Closed and cancel the read loop. Only the first call has an effect.
    pub fn close(&self) {
        let previous = self
            .inner
            .state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if previous == ConnectionState::Closed as u8 {
            return;
        }
        self.inner.cancel.cancel();
        if previous == ConnectionState::Active as u8 {
            self.inner.metrics.connection_closed();
        }
        debug!(peer = ?self.peer_id(), remote = %self.inner.remote_addr, "Connection closed");
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await
    }

    async fn shutdown_writer(&self) {
        let mut writer = self.inner.writer.lock().await;
        if let Err(e) = with_timeout_error(writer.close(), self.inner.send_timeout).await {
            trace!(error = %e, "Write half shutdown failed");
        }
    }

    /// Start the read loop on its own task.
    pub(crate) fn spawn_read_loop(&self, reader: PacketReader, pool: ConnectionPool) -> JoinHandle<()> {
        let conn = self.clone();
        tokio::spawn(async move { conn.read_loop(reader, pool).await })
    }

    /// Read packets until the socket fails or the connection is closed.
    ///
    /// Packets are handled in arrival order on this task. On exit the connection is
    /// closed and removed from the directory if it is still the registered one.
    async fn read_loop(self, mut reader: PacketReader, pool: ConnectionPool) {
        loop {
            let next = tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                next = reader.next() => next,
            };

            match next {
                Some(Ok(packet)) => {
                    self.inner.metrics.packet_received(packet.encoded_len() as u64);
                    self.handle_inbound(packet, &pool).await;
                }
                Some(Err(e)) => {
                    if !matches!(e, ProtocolError::Io(_)) {
                        self.inner.metrics.decode_error();
                    }
                    warn!(peer = ?self.peer_id(), error = %e, "Read failed, closing connection");
                    break;
                }
                None => {
                    debug!(peer = ?self.peer_id(), "Peer hung up");
                    break;
                }
            }
        }

        self.close();
        pool.directory().deregister_connection(&self);
        self.shutdown_writer().await;
    }

    async fn handle_inbound(&self, packet: Packet, pool: &ConnectionPool) {
        trace!(
            packet_type = %packet.type_name(),
            source = packet.source,
            destination = packet.destination,
            ttl = packet.ttl,
            "Packet received"
        );

        if message::is_link_control(&packet.packet_type) {
            if let Err(e) = self.handle_control(&packet, pool).await {
                debug!(packet_type = %packet.type_name(), error = %e, "Control packet ignored");
            }
            return;
        }

        if packet.destination == self.inner.local_id {
            pool.deliver_local(&packet);
        } else {
            pool.forward(packet).await;
        }
    }

    async fn handle_control(&self, packet: &Packet, pool: &ConnectionPool) -> Result<()> {
        match packet.packet_type {
            message::PROBE => {
                let probe: Probe = attribute::decode(&packet.payload)?;
                self.send_object_to(packet.source, &ProbeReply { nonce: probe.nonce })
                    .await
            }
            message::PROBE_REPLY => {
                let reply: ProbeReply = attribute::decode(&packet.payload)?;
                if !self.inner.liveness.observe(reply.nonce) {
                    trace!(nonce = reply.nonce, "Stale heartbeat reply");
                }
                Ok(())
            }
            message::HELLO => {
                let hello: Hello = attribute::decode(&packet.payload)?;
                self.send_object_to(packet.source, &Ack {}).await?;
                pool.reidentify(self, packet.source, hello.port);
                Ok(())
            }
            _ => {
                trace!(source = packet.source, "Acknowledged");
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("local_id", &self.inner.local_id)
            .field("peer", &self.peer())
            .field("remote_addr", &self.inner.remote_addr)
            .field("direction", &self.inner.direction)
            .field("state", &self.state())
            .finish()
    }
}
