//! Checkout endpoints

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    Json,
};

use super::{ok, AuthenticatedUser, JsonResult};
use crate::models::{
    CheckoutSessionRequest, CheckoutSessionResponse, CheckoutStatusResponse, PaymentIntentRequest,
    PaymentIntentResponse,
};
use crate::state::AppState;

/// POST /api/payment/checkout-session
///
/// Return URLs point at the caller's origin when the browser sends one.
pub async fn create_checkout_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(request): Json<CheckoutSessionRequest>,
) -> JsonResult<CheckoutSessionResponse> {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    let customer = state.auth_service.get_user_by_id(user.user_id).await?;
    ok(state
        .payments
        .create_checkout_session(&customer, request, origin)
        .await?)
}

/// POST /api/payment/payment-intent
pub async fn create_payment_intent(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<PaymentIntentRequest>,
) -> JsonResult<PaymentIntentResponse> {
    let customer = state.auth_service.get_user_by_id(user.user_id).await?;
    ok(state
        .payments
        .create_payment_intent(&customer, request.reservation_id)
        .await?)
}

/// GET /api/payment/checkout-session/:session_id
pub async fn checkout_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<String>,
) -> JsonResult<CheckoutStatusResponse> {
    ok(state
        .payments
        .checkout_status(user.actor(), &session_id)
        .await?)
}
