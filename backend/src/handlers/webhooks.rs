//! Payment processor webhook receiver

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::payment::WebhookAck;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// POST /api/webhooks/stripe
///
/// Takes the raw body: the signature covers the exact bytes sent.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());

    let ack = state.webhooks.handle(&body, signature).await.map_err(|e| {
        tracing::warn!(error = %e, "Webhook rejected");
        e
    })?;

    Ok(Json(match ack {
        WebhookAck::Verified => json!({ "verified": true }),
        WebhookAck::Received => json!({ "received": true }),
        WebhookAck::Duplicate => json!({ "received": true, "duplicate": true }),
    }))
}
