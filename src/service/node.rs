//! # Mesh Node
//!
//! Application entry point: owns the listener, the dispatch registry, the directory
//! and the connection pool of one node.
//!
//! ## Example
//! ```rust,no_run
//! use netmesh::{packet_object, MeshNode, NodeConfig};
//!
//! #[derive(Default)]
//! struct Ping {
//!     seq: u32,
//! }
//!
//! packet_object!(Ping => "PING" { seq: u32 });
//!
//! # async fn run() -> netmesh::Result<()> {
//! let node = MeshNode::new(NodeConfig::default_with_overrides(|c| c.node.id = Some(5)))?;
//! node.register::<Ping, _>(|source, ping| {
//!     println!("ping {} from {source}", ping.seq);
//!     Ok(())
//! })?;
//! node.start().await?;
//!
//! let found = node.discover(vec!["192.168.1.20:420".parse().unwrap()]).await;
//! for peer in found {
//!     node.send(peer.id, &Ping { seq: 1 }).await;
//! }
//! # Ok(())
//! # }
//! ```

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::core::attribute::PacketObject;
use crate::core::packet::{type_name, NodeId};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake;
use crate::protocol::message;
use crate::service::connection::Connection;
use crate::service::directory::{derive_node_id, Node, NodeDirectory};
use crate::service::pool::ConnectionPool;
use crate::transport::tcp;
use crate::utils::metrics::{Metrics, MetricsSnapshot};

pub struct MeshNode {
    id: NodeId,
    pool: ConnectionPool,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl MeshNode {
    /// Build a node from validated configuration. Nothing touches the network yet.
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate_strict()?;
        let id = config
            .node
            .id
            .or_else(|| derive_node_id(config.node.listen_address))
            .ok_or_else(|| ProtocolError::ConfigError(constants::ERR_LOCAL_ID_UNRESOLVED.into()))?;

        let pool = ConnectionPool::new(
            id,
            config,
            Dispatcher::new(),
            NodeDirectory::new(),
            Arc::new(Metrics::new()),
        );
        Ok(Self {
            id,
            pool,
            local_addr: Mutex::new(None),
        })
    }

    /// Bind the listener and start accepting peers; returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let listener = tcp::bind(self.pool.config().node.listen_address).await?;
        let addr = listener.local_addr()?;
        self.pool.set_listen_port(addr.port());
        *self.local_addr.lock() = Some(addr);

        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(e) = tcp::serve(listener, pool).await {
                warn!(error = %e, "Listener stopped");
            }
        });
        info!(node = self.id, address = %addr, "Node started");
        Ok(addr)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Listener address once [`start`](Self::start) has succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn config(&self) -> &NodeConfig {
        self.pool.config()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Handle packets of type `T` addressed to this node.
    ///
    /// Link control tags are reserved and fail with [`ProtocolError::ReservedType`].
    pub fn register<T, F>(&self, handler: F) -> Result<()>
    where
        T: PacketObject,
        F: Fn(NodeId, T) -> Result<()> + Send + Sync + 'static,
    {
        if message::is_link_control(&T::packet_type()) {
            return Err(ProtocolError::ReservedType(type_name(&T::packet_type())));
        }
        self.pool.dispatcher().register::<T, F>(handler)
    }

    pub fn unregister(&self, tag: &str) -> Result<()> {
        self.pool.dispatcher().unregister(tag)
    }

    pub fn unregister_type<T: PacketObject>(&self) -> Result<()> {
        self.pool.dispatcher().unregister_type::<T>()
    }

    /// Record a node's listener address.
    pub fn add_node(&self, id: NodeId, address: SocketAddr) -> Result<()> {
        if id == self.id {
            return Err(ProtocolError::DuplicateNode(id));
        }
        self.pool.directory().add_node(Node::new(id, address))
    }

    /// Forget a node and close its connection.
    pub fn remove_node(&self, id: NodeId) -> Option<Node> {
        self.pool.directory().remove_node(id)
    }

    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.pool.directory().node(id)
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.pool.directory().nodes()
    }

    /// Live connection to `id`, dialing it if its address is known.
    pub async fn connect(&self, id: NodeId) -> Option<Connection> {
        self.pool.resolve_or_connect(id).await
    }

    /// Live connection to `id` without dialing.
    pub fn connection(&self, id: NodeId) -> Option<Connection> {
        self.pool.directory().connection(id)
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.pool.directory().connections()
    }

    /// Send a payload toward `destination`; `false` when it could not leave this node.
    pub async fn send<T: PacketObject>(&self, destination: NodeId, value: &T) -> bool {
        match self.try_send(destination, value).await {
            Ok(()) => true,
            Err(e) => {
                warn!(destination, packet_type = T::PACKET_TYPE, error = %e, "Send failed");
                false
            }
        }
    }

    pub async fn try_send<T: PacketObject>(&self, destination: NodeId, value: &T) -> Result<()> {
        self.pool.send_to(destination, value).await
    }

    /// Send a payload to every known node; returns how many were reached.
    pub async fn broadcast<T: PacketObject>(&self, value: &T) -> usize {
        self.pool.broadcast(value).await
    }

    /// Probe candidate addresses and return the nodes that identified themselves.
    pub async fn discover<I>(&self, addrs: I) -> Vec<Node>
    where
        I: IntoIterator<Item = SocketAddr>,
    {
        handshake::discover_all(&self.pool, addrs).await
    }

    /// Run discovery on a background task.
    pub fn start_scan(&self, addrs: Vec<SocketAddr>) -> JoinHandle<Vec<Node>> {
        let pool = self.pool.clone();
        tokio::spawn(async move { handshake::discover_all(&pool, addrs).await })
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.pool.metrics().snapshot()
    }

    pub fn log_metrics(&self) {
        self.pool.metrics().log_metrics();
    }

    /// Stop the listener and close every connection.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

impl Drop for MeshNode {
    fn drop(&mut self) {
        self.pool.shutdown();
    }
}
