//! HTTP proxy inbound
//!
//! Accepts plain HTTP proxy clients. CONNECT opens an opaque tunnel; every
//! other method carries an absolute URI and has its request bytes forwarded
//! verbatim to the upstream tunnel, with no header mangling.

use super::{open_upstream, InboundListener};
use crate::common::net;
use crate::pool::ProxyPool;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// Upper bound on the request head
const MAX_REQUEST_HEAD: usize = 8192;

/// HTTP proxy listener
pub struct HttpGateway {
    listen: String,
    pool: Arc<ProxyPool>,
    rotate_per_request: Arc<AtomicBool>,
    running: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl HttpGateway {
    pub fn new(listen: String, pool: Arc<ProxyPool>, rotate_per_request: Arc<AtomicBool>) -> Self {
        HttpGateway {
            listen,
            pool,
            rotate_per_request,
            running: AtomicBool::new(false),
            local_addr: Mutex::new(None),
        }
    }

    pub fn listen(&self) -> &str {
        &self.listen
    }

    /// Bound address once the listener has started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    async fn handle_connection(
        pool: Arc<ProxyPool>,
        rotate: bool,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
    ) {
        if let Err(e) = Self::process_connection(&pool, rotate, &mut stream, peer_addr).await {
            debug!("HTTP connection error from {}: {}", peer_addr, e);
        }
    }

    async fn process_connection(
        pool: &ProxyPool,
        rotate: bool,
        stream: &mut TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<()> {
        let head = read_request_head(stream).await?;

        let first_line = head
            .split(|&b| b == b'\r' || b == b'\n')
            .next()
            .unwrap_or_default();
        let first_line = String::from_utf8_lossy(first_line);

        let (method, target) = parse_request_line(&first_line)?;
        let (host, port) = if method == "CONNECT" {
            parse_host_port(target)?
        } else {
            parse_absolute_target(target)?
        };

        debug!("HTTP {} {} -> {}:{}", method, peer_addr, host, port);

        let Some(mut upstream) = open_upstream(pool, rotate, &host, port).await else {
            stream.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await?;
            return Ok(());
        };

        if method == "CONNECT" {
            stream
                .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                .await?;
        } else {
            // Classic proxying replays the original bytes untouched.
            upstream.write_all(&head).await?;
        }

        let (sent, received) = net::bridge(stream, &mut upstream).await;
        debug!(
            "HTTP {} {} -> {}:{} done (sent: {}, received: {})",
            method, peer_addr, host, port, sent, received
        );
        Ok(())
    }
}

#[async_trait]
impl InboundListener for HttpGateway {
    fn name(&self) -> &str {
        "HTTP"
    }

    async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen).await?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(addr);
        info!("HTTP proxy listening on {}", addr);

        self.running.store(true, Ordering::SeqCst);

        while self.running.load(Ordering::SeqCst) {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    net::configure_tcp_stream(&stream);
                    let pool = self.pool.clone();
                    let rotate = self.rotate_per_request.load(Ordering::Relaxed);
                    tokio::spawn(async move {
                        Self::handle_connection(pool, rotate, stream, peer_addr).await;
                    });
                }
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        error!("HTTP accept error: {}", e);
                    }
                }
            }
        }

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        *self.local_addr.lock() = None;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Read the request head: everything up to and including the first blank
/// line, bounded by [`MAX_REQUEST_HEAD`]. Body bytes that arrive in the same
/// segments are kept; they belong to the verbatim forward.
async fn read_request_head(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut head = Vec::with_capacity(1024);
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            if head.is_empty() {
                return Err(Error::protocol("Empty request"));
            }
            return Err(Error::protocol("Connection closed mid-request"));
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(head);
        }
        if head.len() >= MAX_REQUEST_HEAD {
            return Err(Error::protocol("Request head too large"));
        }
    }
}

fn parse_request_line(line: &str) -> Result<(&str, &str)> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(_version)) => Ok((method, target)),
        _ => Err(Error::protocol("Invalid HTTP request line")),
    }
}

/// Parse `host:port` from a CONNECT target.
fn parse_host_port(target: &str) -> Result<(String, u16)> {
    match target.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().map_err(|_| Error::parse("Invalid port"))?;
            Ok((host.to_string(), port))
        }
        None => Ok((target.to_string(), 80)),
    }
}

/// Parse the target host/port out of an absolute request URI (default 80).
fn parse_absolute_target(target: &str) -> Result<(String, u16)> {
    let parsed = url::Url::parse(target)
        .map_err(|e| Error::parse(format!("Invalid request URI: {}", e)))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::parse("Request URI has no host"))?;
    Ok((host.to_string(), parsed.port().unwrap_or(80)))
}
