//! SOCKS4 upstream handshake
//!
//! Classic SOCKS4 CONNECT for IPv4 targets; domain targets use the SOCKS4a
//! extension (invalid destination 0.0.0.1 followed by the hostname) so name
//! resolution happens on the upstream side.

use std::net::Ipv4Addr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::socks::{CMD_CONNECT, SOCKS4_REQUEST_GRANTED, SOCKS4_VERSION};
use crate::{Error, Result};

/// Perform the SOCKS4/4a handshake on an established upstream stream.
pub(super) async fn connect<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    host: &str,
    port: u16,
) -> Result<()> {
    let mut request = vec![SOCKS4_VERSION, CMD_CONNECT];
    request.extend_from_slice(&port.to_be_bytes());

    match host.parse::<Ipv4Addr>() {
        Ok(ip) => {
            request.extend_from_slice(&ip.octets());
            request.push(0x00); // empty user id
        }
        Err(_) => {
            if host.len() > 255 {
                return Err(Error::address("Domain name too long"));
            }
            // SOCKS4a marker address
            request.extend_from_slice(&[0, 0, 0, 1]);
            request.push(0x00); // empty user id
            request.extend_from_slice(host.as_bytes());
            request.push(0x00);
        }
    }

    stream
        .write_all(&request)
        .await
        .map_err(|e| Error::connection(format!("Failed to send SOCKS4 request: {}", e)))?;

    // Reply: VN CD DSTPORT(2) DSTIP(4)
    let mut reply = [0u8; 8];
    stream
        .read_exact(&mut reply)
        .await
        .map_err(|e| Error::connection(format!("Failed to read SOCKS4 reply: {}", e)))?;

    if reply[1] != SOCKS4_REQUEST_GRANTED {
        return Err(Error::proxy(format!(
            "SOCKS4 request rejected: {:#04x}",
            reply[1]
        )));
    }

    Ok(())
}
