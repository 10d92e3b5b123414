//! TCP accept loops (C8) — the Galaxy SIA listener and the trivial IP-check
//! heartbeat listener, each shut down via a shared broadcast signal.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use sia_core::config::SiaConfig;
use sia_services::DispatchQueue;

use crate::connection::handle_connection;

pub async fn run_sia_listener(
    config: Arc<SiaConfig>,
    queue: DispatchQueue,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.listener.bind_addr, config.listener.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "sia listener bound");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("sia listener shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                tracing::debug!(%peer_addr, "connection accepted");
                let config = config.clone();
                let queue = queue.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, config, queue).await;
                });
            }
        }
    }
}

/// The panel's IP-check heartbeat: a trivial echo server on a second port,
/// sharing no state with the core protocol stack. One read, the same bytes
/// written back, then the socket is closed.
pub async fn run_ip_check_listener(
    config: Arc<SiaConfig>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    if !config.ip_check.enabled {
        tracing::info!("ip-check listener disabled");
        return Ok(());
    }

    let addr = format!("{}:{}", config.ip_check.bind_addr, config.ip_check.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "ip-check listener bound");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("ip-check listener shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        tracing::trace!(%peer_addr, "ip-check probe accepted");
                        tokio::spawn(echo_once(stream, peer_addr));
                    }
                    Err(e) => tracing::warn!(error = %e, "ip-check accept failed"),
                }
            }
        }
    }
}

async fn echo_once(mut stream: tokio::net::TcpStream, peer_addr: std::net::SocketAddr) {
    let mut buf = [0u8; 1024];
    let read = match stream.read(&mut buf).await {
        Ok(n) => n,
        Err(e) => {
            tracing::debug!(%peer_addr, error = %e, "ip-check read failed");
            return;
        }
    };
    if read == 0 {
        return;
    }
    if let Err(e) = stream.write_all(&buf[..read]).await {
        tracing::debug!(%peer_addr, error = %e, "ip-check write failed");
    }
}
