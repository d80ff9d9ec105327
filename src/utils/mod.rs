//! # Utility Modules
//!
//! Supporting utilities shared by the protocol and service layers.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup from configuration
//! - **Metrics**: Per-node atomic counters and timing guards
//! - **Timeout**: Async timeout wrappers and timing constants

pub mod logging;
pub mod metrics;
pub mod timeout;

pub use metrics::{Metrics, MetricsSnapshot, Timer};
