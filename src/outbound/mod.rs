//! Upstream dialers
//!
//! Given a pool entry and a target address, establish a TCP connection to the
//! upstream proxy and run its protocol handshake so that the returned stream
//! is a tunnel to the target. Any failure closes the upstream socket and
//! surfaces as an error for the gateway to translate downstream.

mod http;
mod socks4;
mod socks5;

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::common::net::configure_tcp_stream;
use crate::pool::{PoolEntry, Protocol};
use crate::{Error, Result};

/// Upstream TCP connect budget
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Open a tunnel to `host:port` through the given upstream proxy.
pub async fn dial(entry: &PoolEntry, host: &str, port: u16) -> Result<TcpStream> {
    debug!(
        "dialing {}:{} via {} upstream {}",
        host, port, entry.protocol, entry.address
    );

    let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&entry.address))
        .await
        .map_err(|_| Error::timeout(format!("upstream {} connect timed out", entry.address)))?
        .map_err(|e| Error::connection(format!("upstream {}: {}", entry.address, e)))?;
    configure_tcp_stream(&stream);

    match entry.protocol {
        Protocol::Http => http::connect(&mut stream, host, port).await?,
        Protocol::Socks4 => socks4::connect(&mut stream, host, port).await?,
        Protocol::Socks5 => socks5::connect(&mut stream, host, port).await?,
    }

    Ok(stream)
}
