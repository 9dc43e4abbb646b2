//! Health, status and balance endpoints

use super::ErrorResponse;
use crate::api::server::AppState;
use crate::services::metrics::MetricsSnapshot;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub initial_pass_complete: bool,
    pub feed_connected: bool,
    pub feed_last_heartbeat: Option<DateTime<Utc>>,
    /// Sorted for stable output
    pub balances: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub asset: String,
    pub amount: String,
}

/// Asset codes are short upper-case tickers, possibly dotted (`ETH2.S`)
fn valid_asset_code(asset: &str) -> bool {
    let len = asset.len();
    (2..=12).contains(&len)
        && asset
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.')
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

pub async fn auto_sell_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let balances = state
        .engine
        .balances()
        .await
        .into_iter()
        .map(|(asset, amount)| (asset, amount.normalize().to_string()))
        .collect();

    Json(StatusResponse {
        running: state.running.load(Ordering::Relaxed),
        initial_pass_complete: state.engine.initial_pass_complete(),
        feed_connected: state.feed_status.connected(),
        feed_last_heartbeat: state.feed_status.last_heartbeat(),
        balances,
    })
}

pub async fn get_balance(
    State(state): State<AppState>,
    Path(asset): Path<String>,
) -> Result<Json<BalanceResponse>, (StatusCode, Json<ErrorResponse>)> {
    let asset = asset.to_uppercase();
    if !valid_asset_code(&asset) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("invalid asset code: {}", asset),
            }),
        ));
    }

    match state.engine.balance(&asset).await {
        Some(amount) => Ok(Json(BalanceResponse {
            asset,
            amount: amount.normalize().to_string(),
        })),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("unknown asset: {}", asset),
            }),
        )),
    }
}

pub async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
