//! proxypool-rust - self-hosted free-proxy aggregator and rotating gateway
//!
//! Harvests proxy candidates from public sources, validates their
//! reachability and quality, keeps a scored rotating pool, and exposes that
//! pool through two local listeners: an HTTP CONNECT/forward proxy and a
//! SOCKS5 proxy that tunnel client traffic through a rotating upstream.
//!
//! # Architecture
//!
//! ```text
//!             +----------------+
//!             |   hub/ (API)   |
//!             +-------+--------+
//!                     |
//!     +---------------+---------------+
//!     |               |               |
//! +---v----+     +----v----+     +----v-----+
//! | config |     |  pool/  |<----| inbound/ |
//! +--------+     +----+----+     +----+-----+
//!                     ^               |
//! +-----------+  +----+------+  +----v-----+
//! | provider/ |->| validator |  | outbound/|
//! +-----------+  +-----------+  +----------+
//! ```
//!
//! Refresh path: providers -> candidates -> validator -> pool.
//! Serve path: downstream client -> inbound -> pool.next() -> outbound -> target.

pub mod common;
pub mod config;
pub mod hub;
pub mod inbound;
pub mod outbound;
pub mod pool;
pub mod provider;
pub mod refresh;
pub mod validator;

pub use common::error::{Error, Result};
pub use config::Config;

use hub::{AppState, LogChannel};
use inbound::GatewayService;
use pool::ProxyPool;
use provider::{FofaProvider, HunterProvider, QuakeProvider, SourceProvider, SubscriptionProvider};
use refresh::Refresher;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use validator::Validator;

pub const VERSION: &str = "0.3.0";

/// Application instance wiring all components together
pub struct App {
    config: Config,
    pool: Arc<ProxyPool>,
    service: Arc<GatewayService>,
    refresher: Arc<Refresher>,
    logs: LogChannel,
    api_addr: Option<SocketAddr>,
}

impl App {
    /// Build the component graph from configuration.
    pub fn new(config: Config) -> Result<Self> {
        info!("initializing proxypool-rust v{}", VERSION);

        let api_addr = match config.external_controller.as_deref() {
            Some(addr) => Some(
                addr.parse::<SocketAddr>()
                    .map_err(|e| Error::config(format!("external-controller: {}", e)))?,
            ),
            None => None,
        };

        let logs = LogChannel::new();
        let pool = Arc::new(ProxyPool::new());
        if let Some(region) = &config.filter.region {
            pool.set_filter(region.clone(), config.filter.max_latency_ms);
        }

        let validator = Arc::new(Validator::new(
            config.validation.clone(),
            Duration::from_secs(config.probe_timeout_secs),
            config.display_locale.clone(),
        ));

        let mut providers: Vec<Arc<dyn SourceProvider>> =
            vec![Arc::new(SubscriptionProvider::new(&config.sources))];
        if config.engines.fofa.enabled {
            providers.push(Arc::new(FofaProvider::new(config.engines.fofa.clone())));
        }
        if config.engines.quake.enabled {
            providers.push(Arc::new(QuakeProvider::new(config.engines.quake.clone())));
        }
        if config.engines.hunter.enabled {
            providers.push(Arc::new(HunterProvider::new(config.engines.hunter.clone())));
        }
        info!("{} candidate providers configured", providers.len());

        let refresher = Arc::new(Refresher::new(
            pool.clone(),
            providers,
            validator,
            logs.clone(),
        ));

        let service = Arc::new(GatewayService::new(&config, pool.clone(), logs.clone()));

        Ok(App {
            config,
            pool,
            service,
            refresher,
            logs,
            api_addr,
        })
    }

    /// Start listeners, auto-refresh and the management API, then run until
    /// interrupted.
    pub async fn run(&self) -> Result<()> {
        info!("starting gateway...");

        self.service.start_all();

        let shutdown = CancellationToken::new();

        let mut auto_refresh = None;
        if self.config.auto_refresh_minutes > 0 {
            let refresher = self.refresher.clone();
            let stop = shutdown.clone();
            let minutes = self.config.auto_refresh_minutes;
            auto_refresh = Some(tokio::spawn(async move {
                refresher.run_auto_refresh(minutes, stop).await;
            }));
        }

        let mut api_handle = None;
        if let Some(addr) = self.api_addr {
            let state = self.create_app_state();
            api_handle = Some(tokio::spawn(async move {
                if let Err(e) = hub::start_server(state, addr).await {
                    warn!("management API error: {}", e);
                }
            }));
        }

        tokio::signal::ctrl_c().await?;
        info!("received shutdown signal");

        shutdown.cancel();
        self.service.stop_all().await;
        if let Some(handle) = api_handle {
            handle.abort();
        }
        if let Some(handle) = auto_refresh {
            let _ = handle.await;
        }

        info!("gateway stopped");
        Ok(())
    }

    /// Create the state shared with the management API.
    fn create_app_state(&self) -> AppState {
        AppState::new(
            self.pool.clone(),
            self.service.clone(),
            self.refresher.clone(),
            self.logs.clone(),
        )
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    pub fn service(&self) -> &Arc<GatewayService> {
        &self.service
    }

    pub fn refresher(&self) -> &Arc<Refresher> {
        &self.refresher
    }
}
