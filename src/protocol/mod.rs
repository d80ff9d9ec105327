//! # Protocol Layer
//!
//! Packet dispatch and the link control exchanges built on top of the core packet format.
//!
//! ## Components
//! - **Dispatcher**: 4-byte type tag to typed handler registry
//! - **Message**: link control payloads (`HELO`, `ACK`, `RYST`, `ALIV`)
//! - **Handshake**: inbound identification and outbound discovery
//! - **Heartbeat**: counted-retry liveness monitor

pub mod dispatcher;
pub mod handshake;
pub mod heartbeat;
pub mod message;
