use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Signaling-surface errors.
///
/// Everything maps to the wire shape the clients expect:
/// `{"code": -1, "error": "<message>"}` with HTTP 500. A failed offer
/// never creates a session; the media plane itself never surfaces
/// errors here.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("missing SDP in request body")]
    MissingSdp,

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("no a=ssrc line in local SDP answer")]
    NoSsrc,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "offer handling failed");
        let body = Json(json!({
            "code": -1,
            "error": self.to_string(),
        }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
