//! Order and trade lookup endpoints
//!
//! Thin passthrough to the exchange client. The batch endpoint is
//! best-effort: each id resolves or fails independently.

use super::ErrorResponse;
use crate::api::server::AppState;
use crate::services::api_errors::ApiError;
use crate::services::exchange::OrderInfo;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Hard cap on batch lookups
const MAX_BATCH_IDS: usize = 20;

/// Kraken txids look like `OQCLML-BW3P3-BUCMWZ`
fn valid_txid(txid: &str) -> bool {
    let len = txid.len();
    (6..=40).contains(&len)
        && txid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub txids: Vec<String>,
}

/// Per-id outcome in a batch response
#[derive(Debug, Serialize)]
pub struct BatchEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn get_trade(
    State(state): State<AppState>,
    Path(txid): Path<String>,
) -> Result<Json<OrderInfo>, (StatusCode, Json<ErrorResponse>)> {
    if !valid_txid(&txid) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("invalid transaction id: {}", txid),
            }),
        ));
    }

    match state.client.query_orders(&[txid.clone()]).await {
        Ok(mut orders) => match orders.remove(&txid) {
            Some(order) => Ok(Json(order)),
            None => Err(not_found(&txid)),
        },
        Err(ApiError::UnknownOrder) => Err(not_found(&txid)),
        Err(e) => {
            debug!("order lookup for {} failed: {}", txid, e);
            Err((
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: format!("exchange lookup failed: {}", e),
                }),
            ))
        }
    }
}

pub async fn batch_lookup(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BTreeMap<String, BatchEntry>>, (StatusCode, Json<ErrorResponse>)> {
    if request.txids.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "txids must not be empty".to_string(),
            }),
        ));
    }
    if request.txids.len() > MAX_BATCH_IDS {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("at most {} txids per request", MAX_BATCH_IDS),
            }),
        ));
    }

    let mut results = BTreeMap::new();
    for txid in request.txids {
        if !valid_txid(&txid) {
            results.insert(
                txid,
                BatchEntry {
                    order: None,
                    error: Some("invalid transaction id".to_string()),
                },
            );
            continue;
        }

        // One call per id keeps the outcomes independent: the exchange
        // fails a whole multi-id query when any single id is unknown.
        let entry = match state.client.query_orders(&[txid.clone()]).await {
            Ok(mut orders) => match orders.remove(&txid) {
                Some(order) => BatchEntry {
                    order: Some(order),
                    error: None,
                },
                None => BatchEntry {
                    order: None,
                    error: Some("unknown order".to_string()),
                },
            },
            Err(e) => BatchEntry {
                order: None,
                error: Some(e.to_string()),
            },
        };
        results.insert(txid, entry);
    }

    Ok(Json(results))
}

fn not_found(txid: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("unknown order: {}", txid),
        }),
    )
}
