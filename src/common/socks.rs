//! SOCKS protocol wire format shared by the SOCKS5 inbound and the upstream
//! dialers.

use crate::common::net::{read_u16_be, read_u8};
use crate::{Error, Result};
use std::net::Ipv4Addr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// SOCKS5 version
pub const SOCKS5_VERSION: u8 = 0x05;

// SOCKS4 version and reply code
pub const SOCKS4_VERSION: u8 = 0x04;
pub const SOCKS4_REQUEST_GRANTED: u8 = 0x5A;

// SOCKS5 authentication methods
pub const AUTH_NO_AUTH: u8 = 0x00;
pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

// SOCKS5 commands
pub const CMD_CONNECT: u8 = 0x01;

// SOCKS5 address types
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

// SOCKS5 reply codes
pub const REP_SUCCEEDED: u8 = 0x00;
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
pub const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Destination requested by a SOCKS5 client. IPv6 (ATYP 4) is rejected at
/// parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestAddr {
    Ipv4(Ipv4Addr),
    Domain(String),
}

impl DestAddr {
    pub fn to_host(&self) -> String {
        match self {
            DestAddr::Ipv4(ip) => ip.to_string(),
            DestAddr::Domain(d) => d.clone(),
        }
    }
}

/// Parsed SOCKS5 CONNECT request
#[derive(Debug)]
pub struct ConnectRequest {
    pub dest: DestAddr,
    pub port: u16,
}

/// Read the client greeting (`VER NMETHODS METHODS...`) and consume the
/// offered methods. The method list itself is not inspected; the listener
/// always selects no-auth.
pub async fn read_greeting<R: AsyncRead + Unpin>(reader: &mut R) -> Result<()> {
    let mut head = [0u8; 2];
    reader.read_exact(&mut head).await?;

    if head[0] != SOCKS5_VERSION {
        return Err(Error::protocol(format!(
            "Unsupported SOCKS version: {}",
            head[0]
        )));
    }

    let mut methods = vec![0u8; head[1] as usize];
    reader.read_exact(&mut methods).await?;
    Ok(())
}

/// Reply to the greeting with the no-auth method selection (`05 00`).
pub async fn write_method_selection<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(&[SOCKS5_VERSION, AUTH_NO_AUTH]).await?;
    Ok(())
}

/// Read a SOCKS5 request header and destination.
///
/// Returns `Error::Unsupported` for commands other than CONNECT and for
/// address types other than IPv4/domain; the listener answers those with
/// reply code `08` before closing.
pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<ConnectRequest> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;

    if header[0] != SOCKS5_VERSION {
        return Err(Error::protocol(format!(
            "Unsupported SOCKS version: {}",
            header[0]
        )));
    }

    if header[1] != CMD_CONNECT {
        return Err(Error::unsupported(format!(
            "SOCKS5 command not handled: {}",
            header[1]
        )));
    }

    let dest = match header[3] {
        ATYP_IPV4 => {
            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf).await?;
            DestAddr::Ipv4(Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]))
        }
        ATYP_DOMAIN => {
            let len = read_u8(reader).await?;
            let mut buf = vec![0u8; len as usize];
            reader.read_exact(&mut buf).await?;
            let domain = String::from_utf8(buf)
                .map_err(|e| Error::parse(format!("Invalid domain: {}", e)))?;
            DestAddr::Domain(domain)
        }
        t => {
            return Err(Error::unsupported(format!(
                "SOCKS5 address type not handled: {}",
                t
            )))
        }
    };

    let port = read_u16_be(reader).await?;

    Ok(ConnectRequest { dest, port })
}

/// Write a SOCKS5 reply. The bound address is always `0.0.0.0:0`.
pub async fn write_reply<W: AsyncWrite + Unpin>(writer: &mut W, reply: u8) -> Result<()> {
    let buf = [
        SOCKS5_VERSION,
        reply,
        0x00,
        ATYP_IPV4,
        0,
        0,
        0,
        0,
        0,
        0,
    ];
    writer.write_all(&buf).await?;
    Ok(())
}
