//! # Connection Pool
//!
//! Creates, tracks and routes over peer connections.
//!
//! ## Routing
//! A packet toward `destination` leaves through the first of:
//! 1. the live connection to `destination`
//! 2. a new connection dialed to `destination`'s known address
//! 3. a relay: the live peer with the lowest id that is neither the packet's source
//!    nor already in its resend chain
//!
//! Without a next hop the packet is dropped with [`ProtocolError::Routing`].
//!
//! Dials to the same node are serialized through a per-id async lock and the directory
//! is re-checked after acquiring it, so concurrent senders never open two links to one
//! node. Dials to different nodes never wait on each other.

use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::NodeConfig;
use crate::core::attribute::{self, PacketObject};
use crate::core::codec::PacketCodec;
use crate::core::packet::{NodeId, Packet};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::{Delivery, Dispatcher};
use crate::protocol::heartbeat::HeartbeatMonitor;
use crate::protocol::message::Hello;
use crate::service::connection::{Connection, Direction, PacketReader};
use crate::service::directory::{Node, NodeDirectory};
use crate::transport::tcp;
use crate::utils::metrics::Metrics;

struct PoolInner {
    local_id: NodeId,
    config: NodeConfig,
    dispatcher: Dispatcher,
    directory: NodeDirectory,
    metrics: Arc<Metrics>,
    listen_port: AtomicU16,
    dial_locks: parking_lot::Mutex<HashMap<NodeId, Arc<Mutex<()>>>>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(
        local_id: NodeId,
        config: NodeConfig,
        dispatcher: Dispatcher,
        directory: NodeDirectory,
        metrics: Arc<Metrics>,
    ) -> Self {
        let listen_port = config.node.listen_address.port();
        Self {
            inner: Arc::new(PoolInner {
                local_id,
                config,
                dispatcher,
                directory,
                metrics,
                listen_port: AtomicU16::new(listen_port),
                dial_locks: parking_lot::Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.inner.local_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn directory(&self) -> &NodeDirectory {
        &self.inner.directory
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// Record the port the listener actually bound.
    pub(crate) fn set_listen_port(&self, port: u16) {
        self.inner.listen_port.store(port, Ordering::Relaxed);
    }

    pub fn listen_ip(&self) -> IpAddr {
        self.inner.config.node.listen_address.ip()
    }

    /// Identification payload announcing this node's listener.
    pub fn hello(&self) -> Hello {
        Hello {
            port: self.inner.listen_port.load(Ordering::Relaxed),
        }
    }

    /// Register an identified connection and start its tasks.
    ///
    /// Follows [`NodeDirectory::register_connection`]: a connection that loses to the
    /// registered one is closed.
    pub fn attach(&self, conn: Connection, reader: PacketReader) {
        match self.inner.directory.register_connection(conn.clone()) {
            Ok(None) => self.start_tasks(&conn, reader),
            Ok(Some(kept)) => {
                debug!(peer = ?kept.peer_id(), "Keeping the link dialed by the lower id");
                conn.close();
            }
            Err(e) => {
                warn!(error = %e, "Refusing to attach connection");
                conn.close();
            }
        }
    }

    fn start_tasks(&self, conn: &Connection, reader: PacketReader) {
        conn.spawn_read_loop(reader, self.clone());
        if self.inner.config.heartbeat.enabled {
            HeartbeatMonitor::new(conn.clone(), self.clone(), self.inner.config.heartbeat.clone())
                .spawn();
        }
    }

    /// Live connection to `id`, dialing its known address if needed.
    ///
    /// Returns `None` for unknown nodes and failed dials.
    pub async fn resolve_or_connect(&self, id: NodeId) -> Option<Connection> {
        if id == self.inner.local_id {
            return None;
        }
        if let Some(conn) = self.inner.directory.connection(id) {
            return Some(conn);
        }

        let lock = self.dial_lock(id);
        let _guard = lock.lock().await;
        if let Some(conn) = self.inner.directory.connection(id) {
            return Some(conn);
        }
        let node = self.inner.directory.node(id)?;

        match self.dial(node).await {
            Ok(conn) => Some(conn),
            Err(e) => {
                debug!(node = id, address = %node.address, error = %e, "Dial failed");
                None
            }
        }
    }

    /// Lock serializing dials to `id`. Node ids are a byte, so the table stays small.
    fn dial_lock(&self, id: NodeId) -> Arc<Mutex<()>> {
        self.inner.dial_locks.lock().entry(id).or_default().clone()
    }

    #[instrument(skip(self), fields(local = self.inner.local_id))]
    async fn dial(&self, node: Node) -> Result<Connection> {
        let stream = tcp::connect(node.address, self.inner.config.transport.connect_timeout).await?;
        let (conn, reader) = Connection::new(
            stream,
            node.address,
            Direction::Outbound,
            self.inner.local_id,
            &self.inner.config.transport,
            self.inner.metrics.clone(),
        );

        conn.send_object_to(node.id, &self.hello()).await?;
        conn.activate(node);

        if let Some(existing) = self.inner.directory.register_connection(conn.clone())? {
            debug!(peer = node.id, "Peer's link preferred, dropping the dialed one");
            conn.close();
            return Ok(existing);
        }
        self.start_tasks(&conn, reader);
        info!(peer = node.id, address = %node.address, "Connected");
        Ok(conn)
    }

    /// Transmit `packet` one hop closer to its destination; returns the next hop.
    pub async fn route(&self, packet: Packet) -> Result<NodeId> {
        let destination = packet.destination;
        if let Some(conn) = self.resolve_or_connect(destination).await {
            conn.send_packet(packet).await?;
            return Ok(destination);
        }

        let relay = self
            .inner
            .directory
            .connections()
            .into_iter()
            .filter(|conn| conn.is_active())
            .filter_map(|conn| conn.peer_id().map(|id| (id, conn)))
            .filter(|(id, _)| {
                *id != self.inner.local_id && *id != packet.source && !packet.visited(*id)
            })
            .min_by_key(|(id, _)| *id);

        match relay {
            Some((id, conn)) => {
                trace!(destination, via = id, "Relaying packet");
                conn.send_packet(packet).await?;
                Ok(id)
            }
            None => Err(ProtocolError::Routing(format!(
                "{} {destination}",
                constants::ERR_NO_ROUTE
            ))),
        }
    }

    /// Deliver a packet addressed to this node.
    pub fn deliver_local(&self, packet: &Packet) -> Delivery {
        let delivery = self.inner.dispatcher.dispatch(packet);
        if delivery == Delivery::Handled {
            self.inner.metrics.packet_delivered();
        }
        delivery
    }

    /// Relay a packet addressed to another node. Failures drop the packet.
    pub(crate) async fn forward(&self, mut packet: Packet) {
        match packet.prepare_forward(self.inner.local_id) {
            Ok(()) => {}
            Err(ProtocolError::TtlExpired) => {
                self.inner.metrics.packet_expired();
                debug!(
                    source = packet.source,
                    destination = packet.destination,
                    chain = ?packet.resend_chain,
                    "TTL expired, packet dropped"
                );
                return;
            }
            Err(e) => {
                self.inner.metrics.routing_error();
                warn!(destination = packet.destination, error = %e, "Packet not forwardable");
                return;
            }
        }

        let destination = packet.destination;
        let source = packet.source;
        match self.route(packet).await {
            Ok(via) => {
                self.inner.metrics.packet_forwarded();
                trace!(source, destination, via, "Packet forwarded");
            }
            Err(e) => {
                self.inner.metrics.routing_error();
                warn!(source, destination, error = %e, "Forwarding failed, packet dropped");
            }
        }
    }

    /// Originate a payload toward `destination`.
    pub async fn send_to<T: PacketObject>(&self, destination: NodeId, value: &T) -> Result<()> {
        let payload = attribute::serialize(value)?;
        let packet = Packet::originate(
            T::packet_type(),
            self.inner.config.transport.default_ttl,
            self.inner.local_id,
            destination,
            payload,
        );
        packet.validate()?;

        if destination == self.inner.local_id {
            return match self.deliver_local(&packet) {
                Delivery::Failed => Err(ProtocolError::Custom(format!(
                    "Local handler for {} failed",
                    packet.type_name()
                ))),
                _ => Ok(()),
            };
        }

        self.route(packet).await.map(|_| ()).inspect_err(|_| {
            self.inner.metrics.routing_error();
        })
    }

    /// Send a payload to every known node; returns how many were reached.
    ///
    /// Nodes without a live connection get a short-lived connect, `HELO`, send, close.
    pub async fn broadcast<T: PacketObject>(&self, value: &T) -> usize {
        let payload = match attribute::serialize(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Broadcast payload rejected");
                return 0;
            }
        };

        let targets: Vec<Node> = self
            .inner
            .directory
            .nodes()
            .into_iter()
            .filter(|node| node.id != self.inner.local_id)
            .collect();

        let sends = targets.into_iter().map(|node| {
            let packet = Packet::originate(
                T::packet_type(),
                self.inner.config.transport.default_ttl,
                self.inner.local_id,
                node.id,
                payload.clone(),
            );
            async move {
                let result = match self.inner.directory.connection(node.id) {
                    Some(conn) => conn.send_packet(packet).await,
                    None => self.send_once(node, packet).await,
                };
                match result {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(node = node.id, error = %e, "Broadcast send failed");
                        false
                    }
                }
            }
        });

        futures::future::join_all(sends)
            .await
            .into_iter()
            .filter(|sent| *sent)
            .count()
    }

    /// Connect, identify, send one packet, close.
    async fn send_once(&self, node: Node, packet: Packet) -> Result<()> {
        packet.validate()?;
        let stream = tcp::connect(node.address, self.inner.config.transport.connect_timeout).await?;
        let mut framed = Framed::new(stream, PacketCodec);

        let hello = Packet::originate(
            Hello::packet_type(),
            self.inner.config.transport.default_ttl,
            self.inner.local_id,
            node.id,
            attribute::serialize(&self.hello())?,
        );
        framed.send(hello).await?;
        let len = packet.encoded_len() as u64;
        framed.send(packet).await?;
        self.inner.metrics.packet_sent(len);

        // Let the peer finish its handshake before the socket goes away.
        let handshake = &self.inner.config.handshake;
        let _ = tokio::time::timeout(handshake.budget(), framed.next()).await;
        framed.close().await?;
        Ok(())
    }

    /// Apply a `HELO` received on an established connection.
    ///
    /// The claimed id is bound to the socket's IP and announced port. A connection
    /// known under another id is re-keyed.
    pub(crate) fn reidentify(&self, conn: &Connection, claimed: NodeId, port: u16) {
        if claimed == self.inner.local_id {
            warn!(remote = %conn.remote_addr(), "Peer claimed this node's id, ignoring");
            return;
        }
        let node = Node::new(claimed, SocketAddr::new(conn.remote_addr().ip(), port));
        self.inner.directory.upsert_node(node);

        if conn.peer_id() != Some(claimed) {
            info!(from = ?conn.peer_id(), to = claimed, "Peer re-identified");
            self.inner.directory.deregister_connection(conn);
            conn.set_peer(node);
            match self.inner.directory.register_connection(conn.clone()) {
                Ok(None) => {}
                Ok(Some(_)) => conn.close(),
                Err(e) => warn!(error = %e, "Re-registration failed"),
            }
        }
    }

    /// Close a connection declared dead and forget its node.
    ///
    /// Deregisters before closing, since the read loop's exit path deregisters too. A
    /// connection that was already replaced leaves the node record alone.
    pub(crate) fn evict(&self, conn: &Connection) {
        if self.inner.directory.deregister_connection(conn) {
            if let Some(id) = conn.peer_id() {
                self.inner.directory.remove_node(id);
                info!(node = id, "Node evicted");
            }
        }
        conn.close();
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.directory.close_all();
    }
}
