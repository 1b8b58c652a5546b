//! Management API (hub)
//!
//! REST surface over the pool, the refresh orchestrator, the gateway
//! listeners and the shared log channel. Every response uses one envelope:
//! `{success, message, data?}`. API failures are reported to the caller and
//! never crash the data plane.

mod logs;
mod proxies;
mod service;

pub use logs::{LogChannel, LogEvent};

use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::inbound::GatewayService;
use crate::pool::ProxyPool;
use crate::refresh::Refresher;
use crate::Result;

/// Response envelope shared by every endpoint
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        ApiResponse {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        ApiResponse {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ApiResponse {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<ProxyPool>,
    pub service: Arc<GatewayService>,
    pub refresher: Arc<Refresher>,
    pub logs: LogChannel,
    /// True while a background refresh/check runs.
    pub refreshing: Arc<AtomicBool>,
    /// Cancel handle for the running refresh, if any.
    pub refresh_cancel: Arc<Mutex<Option<CancellationToken>>>,
}

impl AppState {
    pub fn new(
        pool: Arc<ProxyPool>,
        service: Arc<GatewayService>,
        refresher: Arc<Refresher>,
        logs: LogChannel,
    ) -> Self {
        AppState {
            pool,
            service,
            refresher,
            logs,
            refreshing: Arc::new(AtomicBool::new(false)),
            refresh_cancel: Arc::new(Mutex::new(None)),
        }
    }
}

/// Create the main router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(hello))
        .route("/version", get(version))
        .route("/proxies", get(proxies::list_proxies))
        .route("/proxies/rotate", post(proxies::rotate_proxy))
        .route("/proxies/current", get(proxies::get_current))
        .route("/proxies/current", put(proxies::set_current))
        .route("/proxies/count", get(proxies::get_count))
        .route("/proxies/regions", get(proxies::get_regions))
        .route("/proxies/filter", put(proxies::set_filter))
        .route("/proxies/check", post(proxies::check_proxies))
        .route("/proxies/:address", delete(proxies::remove_proxy))
        .route("/refresh", post(service::trigger_refresh))
        .route("/refresh", delete(service::cancel_refresh))
        .route("/mode", put(service::set_rotation_mode))
        .route("/service/start", post(service::start_service))
        .route("/service/stop", post(service::stop_service))
        .route("/service/status", get(service::service_status))
        .route("/logs", get(logs::get_logs))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the management API server
pub async fn start_server(state: AppState, addr: SocketAddr) -> Result<()> {
    let router = create_router(state);
    info!("management API listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .await
        .map_err(|e| crate::Error::internal(e.to_string()))?;
    Ok(())
}

async fn hello() -> Json<Value> {
    Json(json!({ "hello": "proxypool" }))
}

async fn version() -> Json<Value> {
    Json(json!({ "version": crate::VERSION }))
}
