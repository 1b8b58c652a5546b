//! Pool endpoints

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::cmp::Ordering;
use std::sync::atomic::Ordering as AtomicOrdering;
use tokio_util::sync::CancellationToken;

use super::{ApiResponse, AppState};
use crate::pool::{Protocol, Status};
use crate::provider::Candidate;

#[derive(Debug, Deserialize)]
pub struct FilterParams {
    #[serde(default = "default_region")]
    pub region: String,
    pub max_latency_ms: Option<u64>,
}

fn default_region() -> String {
    "All".to_string()
}

/// GET /proxies - install the filter and return the matching entries,
/// score-sorted.
pub async fn list_proxies(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
) -> Json<ApiResponse> {
    state
        .pool
        .set_filter(params.region.clone(), params.max_latency_ms);

    let filter = state.pool.filter();
    let mut entries: Vec<_> = state
        .pool
        .snapshot()
        .into_iter()
        .filter(|e| e.status == Status::Working && filter.matches(e))
        .collect();
    entries.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    Json(ApiResponse::ok("proxies", json!(entries)))
}

/// POST /proxies/rotate - manually advance the rotation
pub async fn rotate_proxy(State(state): State<AppState>) -> Json<ApiResponse> {
    match state.pool.next() {
        Some(entry) => Json(ApiResponse::ok(
            format!("rotated to {}", entry.address),
            json!(entry),
        )),
        None => Json(ApiResponse::error("no proxy available")),
    }
}

/// GET /proxies/current
pub async fn get_current(State(state): State<AppState>) -> Json<ApiResponse> {
    Json(ApiResponse::ok("current", json!(state.pool.current())))
}

#[derive(Debug, Deserialize)]
pub struct SetCurrentRequest {
    pub address: String,
}

/// PUT /proxies/current - pin the served entry by address
pub async fn set_current(
    State(state): State<AppState>,
    Json(request): Json<SetCurrentRequest>,
) -> Json<ApiResponse> {
    match state.pool.set_current(&request.address) {
        Some(entry) => Json(ApiResponse::ok(
            format!("current set to {}", entry.address),
            json!(entry),
        )),
        None => Json(ApiResponse::error(format!(
            "{} is not a working proxy",
            request.address
        ))),
    }
}

/// GET /proxies/count - working entries
pub async fn get_count(State(state): State<AppState>) -> Json<ApiResponse> {
    Json(ApiResponse::ok(
        "count",
        json!({ "count": state.pool.active_count() }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct RegionParams {
    pub max_latency_ms: Option<u64>,
}

/// GET /proxies/regions - working entries per region
pub async fn get_regions(
    State(state): State<AppState>,
    Query(params): Query<RegionParams>,
) -> Json<ApiResponse> {
    let counts = state.pool.regions_with_counts(params.max_latency_ms);
    Json(ApiResponse::ok("regions", json!(counts)))
}

/// PUT /proxies/filter
pub async fn set_filter(
    State(state): State<AppState>,
    Json(params): Json<FilterParams>,
) -> Json<ApiResponse> {
    state.pool.set_filter(params.region, params.max_latency_ms);
    Json(ApiResponse::message("filter installed"))
}

/// DELETE /proxies/:address
pub async fn remove_proxy(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Json<ApiResponse> {
    if state.pool.remove(&address) {
        Json(ApiResponse::message(format!("{} removed", address)))
    } else {
        Json(ApiResponse::error(format!("{} not found", address)))
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub proxies: Vec<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "http".to_string()
}

/// POST /proxies/check - validate a user-supplied candidate list in the
/// background and admit survivors without clearing the pool.
pub async fn check_proxies(
    State(state): State<AppState>,
    Json(request): Json<CheckRequest>,
) -> Json<ApiResponse> {
    let protocol = match Protocol::try_from(request.protocol.as_str()) {
        Ok(protocol) => protocol,
        Err(e) => return Json(ApiResponse::error(e.to_string())),
    };
    if request.proxies.is_empty() {
        return Json(ApiResponse::error("no proxies supplied"));
    }
    if state.refreshing.swap(true, AtomicOrdering::SeqCst) {
        return Json(ApiResponse::error("a refresh is already running"));
    }

    let candidates: Vec<Candidate> = request
        .proxies
        .into_iter()
        .map(|address| Candidate { address, protocol })
        .collect();
    let count = candidates.len();

    let cancel = CancellationToken::new();
    *state.refresh_cancel.lock() = Some(cancel.clone());

    let refresher = state.refresher.clone();
    let refreshing = state.refreshing.clone();
    tokio::spawn(async move {
        refresher.check(candidates, &cancel).await;
        refreshing.store(false, AtomicOrdering::SeqCst);
    });

    Json(ApiResponse::message(format!(
        "validation of {} proxies started",
        count
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params: FilterParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.region, "All");
        assert!(params.max_latency_ms.is_none());

        let check: CheckRequest =
            serde_json::from_str(r#"{"proxies": ["1.2.3.4:80"]}"#).unwrap();
        assert_eq!(check.protocol, "http");
    }
}
