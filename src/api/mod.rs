//! HTTP control plane.
//!
//! All responses are JSON with ISO-8601 UTC timestamps; decimal fields are
//! strings. Errors map per the platform taxonomy (422 validation, 404
//! unknown, 409 state-machine conflict, 503 no adapter).

pub mod error;
pub mod middleware;
pub mod routes;

pub use error::{ApiError, ApiResult};

use crate::bus::EventLog;
use crate::manager::RunManager;
use crate::sse::SseBroadcaster;
use crate::store::{BarStore, OrderStore, RunStore};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared state injected into every handler. No module-level singletons:
/// tests construct a complete core with an in-memory log and stub stores.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<RunManager>,
    pub log: Arc<dyn EventLog>,
    pub runs: Arc<RunStore>,
    pub orders: Arc<OrderStore>,
    pub bars: Arc<BarStore>,
    pub sse: Arc<SseBroadcaster>,
}

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/healthz", get(routes::healthz))
        .route("/api/v1/runs", get(routes::list_runs).post(routes::create_run))
        .route("/api/v1/runs/:id", get(routes::get_run))
        .route("/api/v1/runs/:id/start", post(routes::start_run))
        .route("/api/v1/runs/:id/stop", post(routes::stop_run))
        .route("/api/v1/orders", get(routes::list_orders).post(routes::create_order))
        .route("/api/v1/orders/:id", get(routes::get_order).delete(routes::cancel_order))
        .route("/api/v1/candles", get(routes::candles))
        .route("/api/v1/events/stream", get(routes::events_stream))
        .layer(axum::middleware::from_fn(middleware::request_logging))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
