//! # netmesh
//!
//! Peer-to-peer node communication layer. Every running node listens on TCP, exchanges a
//! compact binary packet format with its peers, and forwards packets toward nodes it is
//! not directly connected to.
//!
//! ## Layers
//! - [`core`]: packet layout, stream codec, payload attribute serialization
//! - [`protocol`]: dispatch registry, link control messages, handshake, heartbeat
//! - [`service`]: node directory, connections, connection pool, the [`MeshNode`] facade
//! - [`transport`]: TCP listener and dialer
//! - [`utils`]: logging setup, metrics, timeout helpers
//!
//! ## Quick Start
//! ```rust,no_run
//! use netmesh::{packet_object, MeshNode, NodeConfig};
//!
//! #[derive(Debug, Default)]
//! struct Greeting {
//!     text: String,
//! }
//!
//! packet_object!(Greeting => "GRET" { text: String });
//!
//! # async fn run() -> netmesh::Result<()> {
//! let mut config = NodeConfig::default();
//! config.node.id = Some(1);
//! config.node.listen_address = "127.0.0.1:4200".parse().unwrap();
//!
//! let node = MeshNode::new(config)?;
//! node.register::<Greeting, _>(|source, greeting| {
//!     println!("node {source} says {}", greeting.text);
//!     Ok(())
//! })?;
//! node.start().await?;
//!
//! node.add_node(2, "127.0.0.1:4201".parse().unwrap())?;
//! node.send(2, &Greeting { text: "hello".into() }).await;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::NodeConfig;
pub use core::attribute::PacketObject;
pub use core::packet::{format_type, NodeId, Packet, TypeTag};
pub use error::{ProtocolError, Result};
pub use service::directory::Node;
pub use service::node::MeshNode;

#[doc(hidden)]
pub mod __private {
    pub use once_cell::sync::Lazy;
}
