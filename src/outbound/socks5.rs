//! SOCKS5 upstream handshake (RFC 1928)
//!
//! No-auth greeting, CONNECT request, reply check. Free-list upstreams do not
//! carry credentials; a server that insists on authentication is treated as a
//! failed dial.

use std::net::Ipv4Addr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::socks::{
    ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, AUTH_NO_AUTH, CMD_CONNECT, REP_SUCCEEDED, SOCKS5_VERSION,
};
use crate::{Error, Result};

/// Perform the SOCKS5 handshake on an established upstream stream.
pub(super) async fn connect<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    host: &str,
    port: u16,
) -> Result<()> {
    // Greeting: no-auth only.
    stream
        .write_all(&[SOCKS5_VERSION, 1, AUTH_NO_AUTH])
        .await
        .map_err(|e| Error::connection(format!("Failed to send SOCKS5 greeting: {}", e)))?;

    let mut selection = [0u8; 2];
    stream
        .read_exact(&mut selection)
        .await
        .map_err(|e| Error::connection(format!("Failed to read SOCKS5 selection: {}", e)))?;
    if selection[0] != SOCKS5_VERSION {
        return Err(Error::protocol("Invalid SOCKS5 version"));
    }
    if selection[1] != AUTH_NO_AUTH {
        return Err(Error::proxy(format!(
            "SOCKS5 upstream requires auth method {}",
            selection[1]
        )));
    }

    // CONNECT request.
    let mut request = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00];
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        request.push(ATYP_IPV4);
        request.extend_from_slice(&ip.octets());
    } else {
        if host.len() > 255 {
            return Err(Error::address("Domain name too long"));
        }
        request.push(ATYP_DOMAIN);
        request.push(host.len() as u8);
        request.extend_from_slice(host.as_bytes());
    }
    request.extend_from_slice(&port.to_be_bytes());

    stream
        .write_all(&request)
        .await
        .map_err(|e| Error::connection(format!("Failed to send SOCKS5 request: {}", e)))?;

    // Reply header, then skip the bound address.
    let mut reply = [0u8; 4];
    stream
        .read_exact(&mut reply)
        .await
        .map_err(|e| Error::connection(format!("Failed to read SOCKS5 reply: {}", e)))?;
    if reply[0] != SOCKS5_VERSION {
        return Err(Error::protocol("Invalid SOCKS5 version in reply"));
    }
    if reply[1] != REP_SUCCEEDED {
        return Err(Error::proxy(reply_error_message(reply[1])));
    }

    match reply[3] {
        ATYP_IPV4 => {
            let mut buf = [0u8; 4 + 2];
            stream.read_exact(&mut buf).await?;
        }
        ATYP_IPV6 => {
            let mut buf = [0u8; 16 + 2];
            stream.read_exact(&mut buf).await?;
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut buf = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut buf).await?;
        }
        _ => return Err(Error::protocol("Invalid address type in reply")),
    }

    Ok(())
}

fn reply_error_message(code: u8) -> String {
    match code {
        0x01 => "General SOCKS server failure".to_string(),
        0x02 => "Connection not allowed by ruleset".to_string(),
        0x03 => "Network unreachable".to_string(),
        0x04 => "Host unreachable".to_string(),
        0x05 => "Connection refused".to_string(),
        0x06 => "TTL expired".to_string(),
        0x07 => "Command not supported".to_string(),
        0x08 => "Address type not supported".to_string(),
        _ => format!("Unknown error: {}", code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_connect_domain_target() {
        let (mut upstream, mut local) = duplex(4096);
        let server = tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            upstream.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [0x05, 0x01, 0x00]);
            upstream.write_all(&[0x05, 0x00]).await.unwrap();

            let mut head = [0u8; 5];
            upstream.read_exact(&mut head).await.unwrap();
            assert_eq!(&head[..4], &[0x05, 0x01, 0x00, 0x03]);
            let mut rest = vec![0u8; head[4] as usize + 2];
            upstream.read_exact(&mut rest).await.unwrap();
            assert_eq!(&rest[..head[4] as usize], b"example.com");

            upstream
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        connect(&mut local, "example.com", 443).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused_by_upstream() {
        let (mut upstream, mut local) = duplex(4096);
        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            let _ = upstream.read_exact(&mut greeting).await;
            let _ = upstream.write_all(&[0x05, 0x00]).await;
            let mut request = vec![0u8; 64];
            let _ = upstream.read(&mut request).await;
            let _ = upstream
                .write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await;
        });

        let err = connect(&mut local, "1.2.3.4", 80).await.unwrap_err();
        assert!(err.to_string().contains("Connection refused"));
    }

    #[tokio::test]
    async fn test_connect_auth_demanded() {
        let (mut upstream, mut local) = duplex(64);
        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            let _ = upstream.read_exact(&mut greeting).await;
            let _ = upstream.write_all(&[0x05, 0x02]).await;
        });

        assert!(connect(&mut local, "example.com", 80).await.is_err());
    }

    #[test]
    fn test_reply_error_messages() {
        assert_eq!(reply_error_message(0x05), "Connection refused");
        assert_eq!(reply_error_message(0x03), "Network unreachable");
    }
}
