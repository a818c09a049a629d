//! Assembles the axum `Router` (grounded on `orchestrate-web`'s router wiring).

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::webhook::merge_queue_webhook_handler;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/merge-queue", post(merge_queue_webhook_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
