mod offer;
mod stats;

use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/offer", post(offer::offer))
        .route("/stats", get(stats::stats))
        .route("/health", get(stats::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
