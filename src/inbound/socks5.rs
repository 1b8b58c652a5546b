//! SOCKS5 proxy inbound
//!
//! RFC 1928 CONNECT only, no authentication. IPv4 and domain destinations
//! are accepted; every other address type, and every other command, is
//! answered with reply code `08` before closing. Reply bind addresses are
//! always `0.0.0.0:0`.

use super::{open_upstream, InboundListener};
use crate::common::net;
use crate::common::socks::{
    self, REP_ADDRESS_TYPE_NOT_SUPPORTED, REP_HOST_UNREACHABLE, REP_SUCCEEDED,
};
use crate::pool::ProxyPool;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// SOCKS5 proxy listener
pub struct Socks5Gateway {
    listen: String,
    pool: Arc<ProxyPool>,
    rotate_per_request: Arc<AtomicBool>,
    running: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Socks5Gateway {
    pub fn new(listen: String, pool: Arc<ProxyPool>, rotate_per_request: Arc<AtomicBool>) -> Self {
        Socks5Gateway {
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
            debug!("SOCKS5 connection error from {}: {}", peer_addr, e);
        }
    }

    async fn process_connection(
        pool: &ProxyPool,
        rotate: bool,
        stream: &mut TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<()> {
        socks::read_greeting(stream).await?;
        socks::write_method_selection(stream).await?;

        let request = match socks::read_request(stream).await {
            Ok(request) => request,
            Err(Error::Unsupported(msg)) => {
                socks::write_reply(stream, REP_ADDRESS_TYPE_NOT_SUPPORTED).await?;
                return Err(Error::Unsupported(msg));
            }
            Err(e) => return Err(e),
        };

        let host = request.dest.to_host();
        debug!("SOCKS5 CONNECT {} -> {}:{}", peer_addr, host, request.port);

        let Some(mut upstream) = open_upstream(pool, rotate, &host, request.port).await else {
            socks::write_reply(stream, REP_HOST_UNREACHABLE).await?;
            return Ok(());
        };

        socks::write_reply(stream, REP_SUCCEEDED).await?;

        let (sent, received) = net::bridge(stream, &mut upstream).await;
        debug!(
            "SOCKS5 {} -> {}:{} done (sent: {}, received: {})",
            peer_addr, host, request.port, sent, received
        );
        Ok(())
    }
}

#[async_trait]
impl InboundListener for Socks5Gateway {
    fn name(&self) -> &str {
        "SOCKS5"
    }

    async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen).await?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(addr);
        info!("SOCKS5 proxy listening on {}", addr);

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
                        error!("SOCKS5 accept error: {}", e);
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
