use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::relay::PeerSession;
use crate::state::AppState;

/// JSON offer body, as sent by browser clients.
#[derive(Debug, Deserialize)]
struct JsonOffer {
    sdp: String,
}

#[derive(Debug, Serialize)]
pub struct OfferResponse {
    pub code: i32,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub sdp: String,
    #[serde(rename = "connectionId")]
    pub connection_id: Uuid,
}

/// `POST /offer`: negotiate one viewer session.
///
/// The body is an SDP offer, either raw text (any MIME type) or the
/// JSON form `{"sdp": "...", "type": "offer"}`.
pub async fn offer(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<OfferResponse>> {
    let offer_sdp = parse_offer_body(&headers, body)?;
    let (session, answer_sdp) =
        PeerSession::connect(state.media.clone(), &state.config, offer_sdp).await?;

    Ok(Json(OfferResponse {
        code: 0,
        kind: "answer",
        sdp: answer_sdp,
        connection_id: session.id,
    }))
}

fn parse_offer_body(headers: &HeaderMap, body: String) -> Result<String> {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));

    let sdp = if is_json {
        let offer: JsonOffer = serde_json::from_str(&body)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid JSON offer: {e}")))?;
        offer.sdp
    } else {
        body
    };

    if sdp.trim().is_empty() {
        return Err(AppError::MissingSdp);
    }
    Ok(sdp)
}
