//! Async timeout helpers and the crate's timing constants.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::{ProtocolError, Result};

/// Generic timeout for a single network operation
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Outbound dial timeout
pub const CONNECT_TIMEOUT: Duration = DEFAULT_TIMEOUT;

/// Single framed write timeout
pub const SEND_TIMEOUT: Duration = DEFAULT_TIMEOUT;

/// Pause between heartbeat probe cycles
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);

/// Wait between heartbeat reply checks
pub const HEARTBEAT_TICK: Duration = Duration::from_millis(300);

/// Wait per inbound identification attempt
pub const HANDSHAKE_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(300);

/// Pause between discovery dials to the same candidate
pub const DISCOVERY_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Run `fut` with a deadline, mapping expiry to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
