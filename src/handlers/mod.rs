use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod settlement;

/// HTTP surface: the gateway redirect target, draft intake and a liveness probe.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(settlement::health))
        .route("/payments/callback", get(settlement::payment_callback))
        .route("/drafts", post(settlement::save_draft))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
