//! TCP listener and dialer.
//!
//! The accept loop hands every socket to the inbound handshake on its own task and
//! stops when the pool's shutdown token fires. Connections already promoted keep
//! running until the pool closes them.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, instrument};

use crate::error::Result;
use crate::protocol::handshake;
use crate::service::pool::ConnectionPool;
use crate::utils::timeout::with_timeout_error;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bind the listener. Failure is fatal to node startup.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    Ok(listener)
}

/// Dial `addr` within `timeout`.
pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let stream = with_timeout_error(
        async { TcpStream::connect(addr).await.map_err(Into::into) },
        timeout,
    )
    .await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Accept connections until the pool shuts down.
#[instrument(skip(listener, pool), fields(local = pool.local_id()))]
pub async fn serve(listener: TcpListener, pool: ConnectionPool) -> Result<()> {
    let shutdown = pool.shutdown_token().clone();
    if let Ok(addr) = listener.local_addr() {
        info!(address = %addr, "Listening");
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Listener shutting down");
                return Ok(());
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, remote)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%remote, error = %e, "Failed to set TCP_NODELAY");
                        }
                        let pool = pool.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handshake::accept_inbound(pool, stream, remote).await {
                                debug!(%remote, error = %e, "Inbound connection rejected");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }
    }
}
