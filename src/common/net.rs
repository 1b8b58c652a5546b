//! Network utilities

use socket2::SockRef;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::Result;

/// Read/write chunk size for the byte-bridge
pub const BRIDGE_CHUNK_SIZE: usize = 8192;

/// Per-poll idle ceiling for the byte-bridge
pub const BRIDGE_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

#[inline]
pub fn configure_tcp_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
    let _ = sock.set_reuse_address(true);
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let _ = sock.set_reuse_port(true);
}

enum Transfer {
    DownstreamToUpstream(usize),
    UpstreamToDownstream(usize),
    Closed,
}

/// Shuttle bytes between a downstream client socket and an upstream tunnel.
///
/// Each poll waits at most [`BRIDGE_IDLE_TIMEOUT`] for either side to become
/// readable and moves up to [`BRIDGE_CHUNK_SIZE`] bytes to the other side.
/// Terminates on EOF, error, or an idle poll. Both sockets are shut down and
/// dropped on every exit path. Returns (upload, download) byte counts.
pub async fn bridge<A, B>(downstream: A, upstream: B) -> (u64, u64)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut down_r, mut down_w) = tokio::io::split(downstream);
    let (mut up_r, mut up_w) = tokio::io::split(upstream);

    let mut down_buf = vec![0u8; BRIDGE_CHUNK_SIZE];
    let mut up_buf = vec![0u8; BRIDGE_CHUNK_SIZE];
    let mut uploaded = 0u64;
    let mut downloaded = 0u64;

    loop {
        let turn = timeout(BRIDGE_IDLE_TIMEOUT, async {
            tokio::select! {
                res = down_r.read(&mut down_buf) => match res {
                    Ok(0) | Err(_) => Transfer::Closed,
                    Ok(n) => {
                        if up_w.write_all(&down_buf[..n]).await.is_err() {
                            Transfer::Closed
                        } else {
                            Transfer::DownstreamToUpstream(n)
                        }
                    }
                },
                res = up_r.read(&mut up_buf) => match res {
                    Ok(0) | Err(_) => Transfer::Closed,
                    Ok(n) => {
                        if down_w.write_all(&up_buf[..n]).await.is_err() {
                            Transfer::Closed
                        } else {
                            Transfer::UpstreamToDownstream(n)
                        }
                    }
                },
            }
        })
        .await;

        match turn {
            Ok(Transfer::DownstreamToUpstream(n)) => uploaded += n as u64,
            Ok(Transfer::UpstreamToDownstream(n)) => downloaded += n as u64,
            Ok(Transfer::Closed) | Err(_) => break,
        }
    }

    let _ = down_w.shutdown().await;
    let _ = up_w.shutdown().await;

    (uploaded, downloaded)
}

/// Read a single byte
pub async fn read_u8<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf).await?;
    Ok(buf[0])
}

/// Read 2 bytes as u16 big-endian
pub async fn read_u16_be<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf).await?;
    Ok(u16::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_bridge_is_neutral() {
        // client <-> gateway-side-a ... gateway-side-b <-> server
        let (client, side_a) = duplex(1024);
        let (server, side_b) = duplex(1024);

        let bridge_task = tokio::spawn(bridge(side_a, side_b));

        let (mut client_r, mut client_w) = tokio::io::split(client);
        let (mut server_r, mut server_w) = tokio::io::split(server);

        client_w.write_all(b"ping over the bridge").await.unwrap();
        let mut buf = [0u8; 20];
        server_r.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping over the bridge");

        server_w.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        client_r.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        // Closing the client ends the bridge.
        drop(client_w);
        drop(client_r);
        let (up, down) = bridge_task.await.unwrap();
        assert_eq!(up, 20);
        assert_eq!(down, 4);
    }

    #[tokio::test]
    async fn test_read_helpers() {
        let (mut tx, mut rx) = duplex(16);
        tx.write_all(&[0x05, 0x01, 0xBB]).await.unwrap();
        assert_eq!(read_u8(&mut rx).await.unwrap(), 0x05);
        assert_eq!(read_u16_be(&mut rx).await.unwrap(), 0x01BB);
    }
}
