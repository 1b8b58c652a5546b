//! Inbound listeners
//!
//! The two gateway listeners share an upstream-selection path: honor the
//! per-request rotation toggle, dial through the chosen pool entry, and on
//! dial failure report the entry back to the pool so the next selection
//! skips it.

mod http;
mod socks5;

pub use http::HttpGateway;
pub use socks5::Socks5Gateway;

use crate::config::Config;
use crate::hub::LogChannel;
use crate::outbound;
use crate::pool::ProxyPool;
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::warn;

/// Trait for inbound listeners
#[async_trait]
pub trait InboundListener: Send + Sync {
    /// Get listener name
    fn name(&self) -> &str;

    /// Run the accept loop until stopped
    async fn start(&self) -> Result<()>;

    /// Stop the listener
    async fn stop(&self) -> Result<()>;

    /// Check if listener is running
    fn is_running(&self) -> bool;
}

/// Select an upstream entry and open a tunnel to `host:port` through it.
///
/// With per-request rotation the pool advances on every call; otherwise the
/// pinned entry is reused until it disappears. A failed dial marks the entry
/// unavailable and yields `None`, which the caller turns into the proper
/// downstream error.
pub(crate) async fn open_upstream(
    pool: &ProxyPool,
    rotate_per_request: bool,
    host: &str,
    port: u16,
) -> Option<TcpStream> {
    let entry = if rotate_per_request {
        pool.next()
    } else {
        pool.current().or_else(|| pool.next())
    }?;

    match outbound::dial(&entry, host, port).await {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!("upstream {} failed: {}", entry.address, e);
            pool.report_failure(&entry.address);
            None
        }
    }
}

/// Lifecycle manager for the two gateway listeners.
pub struct GatewayService {
    http: Arc<HttpGateway>,
    socks5: Arc<Socks5Gateway>,
    rotate_per_request: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    logs: LogChannel,
}

impl GatewayService {
    pub fn new(config: &Config, pool: Arc<ProxyPool>, logs: LogChannel) -> Self {
        let rotate_per_request = Arc::new(AtomicBool::new(config.rotate_per_request));
        let http = Arc::new(HttpGateway::new(
            config.http.listen.clone(),
            pool.clone(),
            rotate_per_request.clone(),
        ));
        let socks5 = Arc::new(Socks5Gateway::new(
            config.socks5.listen.clone(),
            pool,
            rotate_per_request.clone(),
        ));
        GatewayService {
            http,
            socks5,
            rotate_per_request,
            handles: Mutex::new(Vec::new()),
            logs,
        }
    }

    pub fn http(&self) -> &Arc<HttpGateway> {
        &self.http
    }

    pub fn socks5(&self) -> &Arc<Socks5Gateway> {
        &self.socks5
    }

    /// Spawn both accept loops. No-op while already started.
    pub fn start_all(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }

        let listeners: [Arc<dyn InboundListener>; 2] =
            [self.http.clone(), self.socks5.clone()];
        for listener in listeners {
            let logs = self.logs.clone();
            let name = listener.name().to_string();
            handles.push(tokio::spawn(async move {
                // A bind failure is fatal for this listener only.
                if let Err(e) = listener.start().await {
                    logs.warn(format!("{} listener failed: {}", name, e));
                }
            }));
        }
        self.logs.info(format!(
            "gateway listeners starting (HTTP {}, SOCKS5 {})",
            self.http.listen(),
            self.socks5.listen()
        ));
    }

    /// Stop both listeners and abort their accept loops.
    pub async fn stop_all(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut handles = self.handles.lock();
            if handles.is_empty() {
                return;
            }
            handles.drain(..).collect()
        };
        let _ = self.http.stop().await;
        let _ = self.socks5.stop().await;
        for handle in handles {
            handle.abort();
        }
        self.logs.info("gateway listeners stopped".to_string());
    }

    pub fn set_rotation_mode(&self, per_request: bool) {
        self.rotate_per_request.store(per_request, Ordering::Relaxed);
        let mode = if per_request { "per-request" } else { "fixed" };
        self.logs.info(format!("rotation mode set to {}", mode));
    }

    pub fn rotate_per_request(&self) -> bool {
        self.rotate_per_request.load(Ordering::Relaxed)
    }
}
