//! # Handshake and Discovery
//!
//! Promotes anonymous sockets into identified, routable connections.
//!
//! ## Inbound
//! An accepted socket is promoted directly when its IP belongs to exactly one known node
//! on another host. Otherwise the peer must identify itself with a `HELO` within a
//! bounded number of reads. On success this node answers `ACK`, records the peer, and
//! hands the socket to the pool. On timeout or violation the socket is closed and the
//! directory is left untouched.
//!
//! ## Discovery
//! A candidate address is dialed (bounded retries), sent a `HELO`, and given a bounded
//! number of reads to `ACK`. The acknowledging node id is recorded and the probe socket
//! closed; traffic later reaches the node through the pool.
//!
//! Both directions read through a connection-scoped [`Dispatcher`] holding only the one
//! handler the exchange expects.

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

use crate::core::attribute::{self, PacketObject};
use crate::core::codec::PacketCodec;
use crate::core::packet::{NodeId, Packet};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::message::{Ack, Hello};
use crate::service::connection::{Connection, Direction, PacketReader};
use crate::service::directory::Node;
use crate::service::pool::ConnectionPool;
use crate::transport::tcp;
use crate::utils::metrics::Timer;

/// Destination used before the peer's id is known
pub const UNKNOWN_NODE: NodeId = 0;

/// Node that `remote` can be promoted to without a handshake, if any.
fn direct_match(pool: &ConnectionPool, remote: SocketAddr) -> Option<Node> {
    let ip = remote.ip();
    // A host address shared with this node cannot tell peers apart.
    if ip.is_loopback() || ip == pool.listen_ip() {
        return None;
    }
    match pool.directory().nodes_at_ip(ip).as_slice() {
        [node] if node.id != pool.local_id() => Some(*node),
        _ => None,
    }
}

/// Identify an accepted socket and register it with the pool.
#[instrument(skip(pool, stream), fields(local = pool.local_id()))]
pub async fn accept_inbound(
    pool: ConnectionPool,
    stream: TcpStream,
    remote: SocketAddr,
) -> Result<Node> {
    let metrics = pool.metrics();
    metrics.handshake_attempt();
    let _timer = Timer::start("handshake");

    let (conn, mut reader) = Connection::new(
        stream,
        remote,
        Direction::Inbound,
        pool.local_id(),
        &pool.config().transport,
        metrics.clone(),
    );

    if let Some(node) = direct_match(&pool, remote) {
        debug!(peer = node.id, "Known address, promoting without handshake");
        conn.activate(node);
        pool.attach(conn, reader);
        metrics.handshake_success();
        return Ok(node);
    }

    match identify(&pool, &conn, &mut reader).await {
        Ok((id, port)) => {
            let node = Node::new(id, SocketAddr::new(remote.ip(), port));
            pool.directory().upsert_node(node);
            conn.activate(node);
            pool.attach(conn, reader);
            metrics.handshake_success();
            info!(peer = id, address = %node.address, "Peer identified");
            Ok(node)
        }
        Err(e) => {
            conn.close();
            metrics.handshake_failed();
            debug!(error = %e, "Handshake failed, socket discarded");
            Err(e)
        }
    }
}

/// Wait for the peer's `HELO` and acknowledge it.
async fn identify(
    pool: &ConnectionPool,
    conn: &Connection,
    reader: &mut PacketReader,
) -> Result<(NodeId, u16)> {
    let config = &pool.config().handshake;
    let claim: Arc<Mutex<Option<(NodeId, u16)>>> = Arc::new(Mutex::new(None));

    let scoped = Dispatcher::new();
    let slot = claim.clone();
    scoped.register::<Hello, _>(move |source, hello| {
        *slot.lock() = Some((source, hello.port));
        Ok(())
    })?;

    for _ in 0..config.attempts {
        let packet = match timeout(config.attempt_timeout, reader.next()).await {
            Err(_) => continue,
            Ok(None) => {
                return Err(ProtocolError::HandshakeError(
                    constants::ERR_PEER_HUNG_UP.into(),
                ))
            }
            Ok(Some(Err(e))) => return Err(ProtocolError::HandshakeError(e.to_string())),
            Ok(Some(Ok(packet))) => packet,
        };

        scoped.dispatch(&packet);
        let claimed = claim.lock().take();
        if let Some((id, port)) = claimed {
            if id == pool.local_id() {
                return Err(ProtocolError::HandshakeError(
                    constants::ERR_SELF_IDENTIFICATION.into(),
                ));
            }
            conn.send_object_to(id, &Ack {}).await?;
            return Ok((id, port));
        }
        debug!(packet_type = %packet.type_name(), "Unexpected packet before identification");
    }

    Err(ProtocolError::HandshakeTimeout)
}

async fn dial_with_retries(pool: &ConnectionPool, addr: SocketAddr) -> Result<TcpStream> {
    let config = &pool.config().handshake;
    let connect_timeout = pool.config().transport.connect_timeout;
    let mut last_error = ProtocolError::Timeout;

    for attempt in 1..=config.connect_attempts {
        match tcp::connect(addr, connect_timeout).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, attempt, error = %e, "Discovery dial failed");
                last_error = e;
                if attempt < config.connect_attempts {
                    sleep(config.retry_delay).await;
                }
            }
        }
    }
    Err(last_error)
}

/// Probe one candidate address and record the node that answers.
#[instrument(skip(pool), fields(local = pool.local_id()))]
pub async fn discover(pool: &ConnectionPool, addr: SocketAddr) -> Result<Node> {
    let config = &pool.config().handshake;
    let stream = dial_with_retries(pool, addr).await?;
    let mut framed = Framed::new(stream, PacketCodec);

    let hello = Packet::originate(
        Hello::packet_type(),
        pool.config().transport.default_ttl,
        pool.local_id(),
        UNKNOWN_NODE,
        attribute::serialize(&pool.hello())?,
    );
    framed.send(hello).await?;

    let acked: Arc<Mutex<Option<NodeId>>> = Arc::new(Mutex::new(None));
    let scoped = Dispatcher::new();
    let slot = acked.clone();
    scoped.register::<Ack, _>(move |source, _| {
        *slot.lock() = Some(source);
        Ok(())
    })?;

    let mut outcome = Err(ProtocolError::HandshakeTimeout);
    for _ in 0..config.attempts {
        match timeout(config.attempt_timeout, framed.next()).await {
            Err(_) => continue,
            Ok(None) => {
                outcome = Err(ProtocolError::HandshakeError(
                    constants::ERR_PEER_HUNG_UP.into(),
                ));
                break;
            }
            Ok(Some(Err(e))) => {
                outcome = Err(e);
                break;
            }
            Ok(Some(Ok(packet))) => {
                scoped.dispatch(&packet);
                let answered = acked.lock().take();
                if let Some(id) = answered {
                    outcome = Ok(id);
                    break;
                }
            }
        }
    }
    let _ = framed.close().await;

    let id = outcome?;
    if id == pool.local_id() {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_SELF_IDENTIFICATION.into(),
        ));
    }
    let node = Node::new(id, addr);
    pool.directory().upsert_node(node);
    info!(peer = id, %addr, "Node discovered");
    Ok(node)
}

/// Probe every candidate concurrently; returns the nodes that answered.
pub async fn discover_all<I>(pool: &ConnectionPool, addrs: I) -> Vec<Node>
where
    I: IntoIterator<Item = SocketAddr>,
{
    let probes = addrs.into_iter().map(|addr| async move {
        match discover(pool, addr).await {
            Ok(node) => Some(node),
            Err(e) => {
                warn!(%addr, error = %e, "Discovery probe failed");
                None
            }
        }
    });
    futures::future::join_all(probes)
        .await
        .into_iter()
        .flatten()
        .collect()
}
