//! Listener control, rotation mode and refresh endpoints

use axum::extract::State;
use axum::Json;
use crate::inbound::InboundListener;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

use super::{ApiResponse, AppState};

/// POST /refresh - start a background refresh cycle
pub async fn trigger_refresh(State(state): State<AppState>) -> Json<ApiResponse> {
    if state.refreshing.swap(true, Ordering::SeqCst) {
        return Json(ApiResponse::error("a refresh is already running"));
    }

    let cancel = CancellationToken::new();
    *state.refresh_cancel.lock() = Some(cancel.clone());

    let refresher = state.refresher.clone();
    let refreshing = state.refreshing.clone();
    tokio::spawn(async move {
        refresher.refresh(&cancel).await;
        refreshing.store(false, Ordering::SeqCst);
    });

    Json(ApiResponse::message("refresh started, watch the logs"))
}

/// DELETE /refresh - cancel the running refresh
pub async fn cancel_refresh(State(state): State<AppState>) -> Json<ApiResponse> {
    if !state.refreshing.load(Ordering::SeqCst) {
        return Json(ApiResponse::error("no refresh is running"));
    }
    if let Some(cancel) = state.refresh_cancel.lock().take() {
        cancel.cancel();
    }
    Json(ApiResponse::message("refresh cancelled"))
}

#[derive(Debug, Deserialize)]
pub struct RotationMode {
    pub per_request: bool,
}

/// PUT /mode - toggle per-request rotation
pub async fn set_rotation_mode(
    State(state): State<AppState>,
    Json(mode): Json<RotationMode>,
) -> Json<ApiResponse> {
    state.service.set_rotation_mode(mode.per_request);
    let mode = if mode.per_request { "per_request" } else { "fixed" };
    Json(ApiResponse::message(format!("rotation mode set to {}", mode)))
}

/// POST /service/start
pub async fn start_service(State(state): State<AppState>) -> Json<ApiResponse> {
    state.service.start_all();
    Json(ApiResponse::message("gateway listeners starting"))
}

/// POST /service/stop
pub async fn stop_service(State(state): State<AppState>) -> Json<ApiResponse> {
    state.service.stop_all().await;
    Json(ApiResponse::message("gateway listeners stopped"))
}

/// GET /service/status
pub async fn service_status(State(state): State<AppState>) -> Json<ApiResponse> {
    let service = &state.service;
    let rotation_mode = if service.rotate_per_request() {
        "per_request"
    } else {
        "fixed"
    };
    let status = json!({
        "http_running": service.http().is_running(),
        "http_listen": service.http().listen(),
        "socks5_running": service.socks5().is_running(),
        "socks5_listen": service.socks5().listen(),
        "rotation_mode": rotation_mode,
        "current_proxy": state.pool.current(),
        "refreshing": state.refreshing.load(Ordering::SeqCst),
    });
    Json(ApiResponse::ok("status", status))
}
