//! TCP connect probe implementation.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

use super::{duration_ms, ProbeError};

/// Run a TCP connect probe against `host:port`.
///
/// Returns the time from dispatch (including name resolution) to handshake
/// completion, in milliseconds. The connection is closed right away.
pub async fn run_tcp_probe(host: &str, port: u16, timeout: Duration) -> Result<f64, ProbeError> {
    if port == 0 {
        return Err(ProbeError::Config("tcp probe requires a port".to_string()));
    }

    let start = Instant::now();

    let attempt = async {
        let addr = resolve_socket_addr(host, port).await?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| classify_connect_error(e, timeout))?;
        let elapsed = start.elapsed();
        drop(stream);
        Ok::<_, ProbeError>(elapsed)
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(elapsed)) => Ok(duration_ms(elapsed)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

/// Resolve to the first address the resolver returns.
async fn resolve_socket_addr(host: &str, port: u16) -> Result<SocketAddr, ProbeError> {
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ProbeError::Dns(e.to_string()))?
        .next()
        .ok_or_else(|| ProbeError::Dns(format!("no addresses found for {}", host)))
}

fn classify_connect_error(e: io::Error, timeout: Duration) -> ProbeError {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => ProbeError::Refused,
        io::ErrorKind::TimedOut => ProbeError::Timeout(timeout),
        _ => ProbeError::Unreachable(e.to_string()),
    }
}
