//! TCP connect probe implementation.

use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;

use super::ProbeError;

/// Run a TCP probe against a `host:port` address.
///
/// Returns the time taken to establish the connection. The socket is closed
/// as soon as the handshake completes; on timeout the pending connect is
/// dropped with it.
pub async fn run_tcp_probe(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let (host, port) = split_host_port(address)?;
    connect_within(TcpStream::connect((host, port)), timeout).await
}

/// Drive a pending connect to completion or give up after `timeout`.
pub(super) async fn connect_within<F>(connect: F, timeout: Duration) -> Result<Duration, ProbeError>
where
    F: Future<Output = io::Result<TcpStream>>,
{
    let start = Instant::now();
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(stream)) => {
            let elapsed = start.elapsed();
            drop(stream);
            Ok(elapsed)
        }
        Ok(Err(e)) => Err(ProbeError::Network(e.to_string())),
        Err(_) => Err(ProbeError::ConnectTimeout),
    }
}

fn split_host_port(address: &str) -> Result<(&str, u16), ProbeError> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| ProbeError::InvalidAddress(format!("missing port in {}", address)))?;

    let port = port
        .parse()
        .map_err(|_| ProbeError::InvalidAddress(format!("invalid port in {}", address)))?;

    Ok((host, port))
}
