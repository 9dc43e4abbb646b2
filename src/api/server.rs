//! Axum server setup and configuration

use crate::api::routes;
use crate::services::{AutoSellEngine, FeedStatus, KrakenClient, Metrics};
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state. Read-only: no route mutates the engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AutoSellEngine>,
    pub client: Arc<KrakenClient>,
    pub feed_status: Arc<FeedStatus>,
    pub metrics: Metrics,
    pub running: Arc<AtomicBool>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        engine: Arc<AutoSellEngine>,
        client: Arc<KrakenClient>,
        feed_status: Arc<FeedStatus>,
        metrics: Metrics,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            engine,
            client,
            feed_status,
            metrics,
            running,
            started_at: Instant::now(),
        }
    }
}

/// Create the Axum application with all routes
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::status::health))
        .route("/auto-sell/status", get(routes::status::auto_sell_status))
        .route("/balance/:asset", get(routes::status::get_balance))
        .route("/metrics", get(routes::status::get_metrics))
        .route("/trade/:txid", get(routes::trades::get_trade))
        .route("/trades/batch", post(routes::trades::batch_lookup))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
