//! Shared helpers for the integration tests.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use futures::{SinkExt, StreamExt};
use netmesh::core::attribute::{serialize, PacketObject};
use netmesh::core::codec::PacketCodec;
use netmesh::protocol::message::{Ack, Hello};
use netmesh::{packet_object, MeshNode, NodeConfig, NodeId, Packet, TypeTag};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::codec::Framed;

/// Application payload used across tests.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Note {
    pub text: String,
}

packet_object!(Note => "NOTE" { text: String });

/// Loopback node configuration with short timers and no heartbeat.
pub fn config(id: NodeId) -> NodeConfig {
    NodeConfig::default_with_overrides(|c| {
        c.node.id = Some(id);
        c.node.listen_address = "127.0.0.1:0".parse().unwrap();
        c.transport.connect_timeout = Duration::from_secs(1);
        c.transport.send_timeout = Duration::from_secs(1);
        c.heartbeat.enabled = false;
        c.handshake.attempts = 5;
        c.handshake.attempt_timeout = Duration::from_millis(100);
        c.handshake.connect_attempts = 2;
        c.handshake.retry_delay = Duration::from_millis(50);
    })
}

pub async fn start(config: NodeConfig) -> (MeshNode, SocketAddr) {
    let node = MeshNode::new(config).expect("valid config");
    let addr = node.start().await.expect("listener binds");
    (node, addr)
}

pub async fn start_node(id: NodeId) -> (MeshNode, SocketAddr) {
    start(config(id)).await
}

/// Poll `check` until it holds or `limit` passes.
pub async fn eventually<F: Fn() -> bool>(limit: Duration, check: F) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(20)).await;
    }
}

/// Hand-driven peer speaking the wire protocol directly.
pub struct RawPeer {
    pub framed: Framed<TcpStream, PacketCodec>,
}

impl RawPeer {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            framed: Framed::new(stream, PacketCodec),
        }
    }

    pub async fn send(&mut self, packet: Packet) {
        self.framed.send(packet).await.expect("raw send");
    }

    pub async fn send_object<T: PacketObject>(&mut self, source: NodeId, dest: NodeId, ttl: u8, value: &T) {
        let mut packet = Packet::new(T::packet_type(), source, dest, serialize(value).unwrap());
        packet.ttl = ttl;
        self.send(packet).await;
    }

    /// Identify as `id` and wait for the node's `ACK`.
    pub async fn identify(&mut self, id: NodeId, port: u16) -> Packet {
        self.send_object(id, 0, 15, &Hello { port }).await;
        self.next_of_type(Ack::packet_type(), Duration::from_secs(2))
            .await
            .expect("handshake acknowledged")
    }

    /// Next packet, or `None` on EOF, error or timeout.
    pub async fn next(&mut self, limit: Duration) -> Option<Packet> {
        match timeout(limit, self.framed.next()).await {
            Ok(Some(Ok(packet))) => Some(packet),
            _ => None,
        }
    }

    pub async fn next_of_type(&mut self, tag: TypeTag, limit: Duration) -> Option<Packet> {
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let packet = self.next(remaining).await?;
            if packet.packet_type == tag {
                return Some(packet);
            }
        }
    }

    /// Whether the node closes the socket within `limit`, skipping any packets.
    pub async fn closed_within(&mut self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.framed.next()).await {
                Err(_) => return false,
                Ok(None) | Ok(Some(Err(_))) => return true,
                Ok(Some(Ok(_))) => continue,
            }
        }
    }
}

/// Listener standing in for a node whose traffic the test inspects.
pub struct RawListener {
    pub listener: TcpListener,
    pub addr: SocketAddr,
}

impl RawListener {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().unwrap();
        Self { listener, addr }
    }

    pub async fn accept(&self, limit: Duration) -> Option<RawPeer> {
        match timeout(limit, self.listener.accept()).await {
            Ok(Ok((stream, _))) => Some(RawPeer::from_stream(stream)),
            _ => None,
        }
    }
}
