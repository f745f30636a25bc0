//! vidgate server library
//!
//! Exposes the gateway components for testing and embedding: the
//! signaling router, the media plane, and the ingest loop. The binary
//! in `main.rs` wires them to real sockets.

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod relay;
pub mod sdp;
pub mod state;

/// Build the signaling router and its backing state.
pub fn create_app(config: config::Config) -> (axum::Router, state::AppState) {
    let app_state = state::AppState::new(config);
    let router = api::create_router(app_state.clone());
    (router, app_state)
}
