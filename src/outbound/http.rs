//! HTTP upstream handshake
//!
//! Issues a CONNECT request to the upstream HTTP proxy and waits for a 2xx
//! status line, leaving the stream as an opaque tunnel to the target.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Result};

/// Perform the HTTP CONNECT handshake on an established upstream stream.
pub(super) async fn connect<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    host: &str,
    port: u16,
) -> Result<()> {
    let request = format!(
        "CONNECT {}:{} HTTP/1.1\r\n\
         Host: {}:{}\r\n\
         Proxy-Connection: keep-alive\r\n\r\n",
        host, port, host, port
    );

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| Error::connection(format!("Failed to send CONNECT request: {}", e)))?;
    stream.flush().await?;

    // Read until the end of the response headers.
    let mut response = [0u8; 1024];
    let mut total_read = 0;
    loop {
        let n = stream
            .read(&mut response[total_read..])
            .await
            .map_err(|e| Error::connection(format!("Failed to read CONNECT response: {}", e)))?;
        if n == 0 {
            return Err(Error::connection("Connection closed during CONNECT"));
        }
        total_read += n;

        if let Some(header_end) = find_header_end(&response[..total_read]) {
            let head = String::from_utf8_lossy(&response[..header_end]);
            let status_line = head.lines().next().unwrap_or("");
            if status_line.contains("200") {
                return Ok(());
            }
            return Err(Error::proxy(format!("CONNECT failed: {}", status_line)));
        }

        if total_read >= response.len() {
            return Err(Error::protocol("CONNECT response too large"));
        }
    }
}

/// Find end of HTTP headers (double CRLF)
fn find_header_end(data: &[u8]) -> Option<usize> {
    for i in 0..data.len().saturating_sub(3) {
        if &data[i..i + 4] == b"\r\n\r\n" {
            return Some(i + 4);
        }
    }
    None
}
