//! # Node Directory
//!
//! The authoritative `id -> address` and `id -> live connection` maps.
//!
//! Both maps sit behind one mutex, so registration, replacement and removal are atomic
//! with respect to each other. At most one connection is registered per node id. A
//! second registration replaces the first unless the first is the preferred side of a
//! simultaneous open, see [`NodeDirectory::register_connection`]. Sockets are closed
//! after the lock is released.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::packet::NodeId;
use crate::error::{constants, ProtocolError, Result};
use crate::service::connection::Connection;

/// Identity of a participating node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Node {
    pub id: NodeId,
    pub address: SocketAddr,
}

impl Node {
    pub fn new(id: NodeId, address: SocketAddr) -> Self {
        Self { id, address }
    }
}

/// Id a node takes when none is configured: the last octet of a concrete IPv4 address.
pub fn derive_node_id(addr: SocketAddr) -> Option<NodeId> {
    match addr {
        SocketAddr::V4(v4) if !v4.ip().is_unspecified() => Some(v4.ip().octets()[3]),
        _ => None,
    }
}

/// Whether `candidate` takes the slot held by the live `existing` link to the same peer.
fn supersedes(candidate: &Connection, existing: &Connection) -> bool {
    candidate.direction() == existing.direction() || candidate.is_preferred()
}

#[derive(Default)]
struct State {
    nodes: HashMap<NodeId, SocketAddr>,
    connections: HashMap<NodeId, Connection>,
}

#[derive(Clone, Default)]
pub struct NodeDirectory {
    state: Arc<Mutex<State>>,
}

impl NodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a node. Re-adding the same binding is a no-op; binding a known id to a
    /// different address is [`ProtocolError::DuplicateNode`].
    pub fn add_node(&self, node: Node) -> Result<()> {
        let mut state = self.state.lock();
        match state.nodes.get(&node.id) {
            Some(existing) if *existing != node.address => {
                Err(ProtocolError::DuplicateNode(node.id))
            }
            Some(_) => Ok(()),
            None => {
                state.nodes.insert(node.id, node.address);
                debug!(node = node.id, address = %node.address, "Node added");
                Ok(())
            }
        }
    }

    /// Record or rebind a node; later identification wins.
    pub fn upsert_node(&self, node: Node) -> Option<Node> {
        let previous = self.state.lock().nodes.insert(node.id, node.address);
        match previous {
            Some(address) if address != node.address => {
                info!(node = node.id, from = %address, to = %node.address, "Node address changed");
            }
            None => debug!(node = node.id, address = %node.address, "Node identified"),
            _ => {}
        }
        previous.map(|address| Node::new(node.id, address))
    }

    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.state
            .lock()
            .nodes
            .get(&id)
            .map(|address| Node::new(id, *address))
    }

    /// Forget a node and close its connection, if any.
    pub fn remove_node(&self, id: NodeId) -> Option<Node> {
        let (address, connection) = {
            let mut state = self.state.lock();
            (state.nodes.remove(&id), state.connections.remove(&id))
        };
        if let Some(connection) = connection {
            connection.close();
        }
        address.map(|address| Node::new(id, address))
    }

    /// Known nodes ordered by id.
    pub fn nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .state
            .lock()
            .nodes
            .iter()
            .map(|(id, address)| Node::new(*id, *address))
            .collect();
        nodes.sort_by_key(|node| node.id);
        nodes
    }

    pub fn nodes_at_ip(&self, ip: IpAddr) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .state
            .lock()
            .nodes
            .iter()
            .filter(|(_, address)| address.ip() == ip)
            .map(|(id, address)| Node::new(*id, *address))
            .collect();
        nodes.sort_by_key(|node| node.id);
        nodes
    }

    /// Live connection to `id`.
    pub fn connection(&self, id: NodeId) -> Option<Connection> {
        self.state
            .lock()
            .connections
            .get(&id)
            .filter(|conn| !conn.is_closed())
            .cloned()
    }

    /// Registered connections ordered by peer id.
    pub fn connections(&self) -> Vec<Connection> {
        let state = self.state.lock();
        let mut ids: Vec<&NodeId> = state.connections.keys().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| state.connections.get(id).cloned())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Register `conn` under its peer id, closing any connection it replaces.
    ///
    /// Against a live link opened from the same end, the later registration wins. Against
    /// a live link opened from the other end, the link dialed by the lower id wins on
    /// both nodes. When the existing link is kept it is returned and `conn` is left for
    /// the caller to close.
    pub fn register_connection(&self, conn: Connection) -> Result<Option<Connection>> {
        let id = conn
            .peer_id()
            .ok_or_else(|| ProtocolError::Routing(constants::ERR_PEER_UNIDENTIFIED.into()))?;

        let replaced = {
            let mut state = self.state.lock();
            if let Some(existing) = state.connections.get(&id) {
                if !existing.same(&conn) && !existing.is_closed() && !supersedes(&conn, existing) {
                    return Ok(Some(existing.clone()));
                }
            }
            state.connections.insert(id, conn.clone())
        };
        if let Some(old) = replaced {
            if !old.same(&conn) {
                debug!(node = id, direction = ?conn.direction(), "Replacing connection");
                old.close();
            }
        }
        // A connection closed before it was registered must not linger.
        if conn.is_closed() {
            self.deregister_connection(&conn);
        }
        Ok(None)
    }

    /// Drop the registration for `id`; repeated calls are harmless.
    pub fn deregister(&self, id: NodeId) -> Option<Connection> {
        self.state.lock().connections.remove(&id)
    }

    /// Drop `conn`'s registration only if it is still the registered one.
    pub fn deregister_connection(&self, conn: &Connection) -> bool {
        let Some(id) = conn.peer_id() else {
            return false;
        };
        let mut state = self.state.lock();
        match state.connections.get(&id) {
            Some(current) if current.same(conn) => {
                state.connections.remove(&id);
                debug!(node = id, "Connection deregistered");
                true
            }
            _ => false,
        }
    }

    /// Close and drop every registered connection; node records are kept.
    pub fn close_all(&self) {
        let connections: Vec<Connection> =
            self.state.lock().connections.drain().map(|(_, conn)| conn).collect();
        for conn in connections {
            conn.close();
        }
    }
}
