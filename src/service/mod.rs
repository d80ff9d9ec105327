//! # Service Layer
//!
//! Node-level state and the public facade.
//!
//! ## Components
//! - **Directory**: node id to address and live connection maps
//! - **Connection**: one peer link with its read/route loop
//! - **Pool**: on-demand dialing, routing, broadcast, eviction
//! - **Node**: [`MeshNode`](node::MeshNode), the application entry point

pub mod connection;
pub mod directory;
pub mod node;
pub mod pool;
