//! # Transport Layer
//!
//! Socket plumbing under the connection pool.
//!
//! ## Components
//! - **TCP**: listener accept loop and timed dialer

pub mod tcp;
