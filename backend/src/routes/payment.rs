//! Checkout and webhook routes

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{payment, webhooks};
use crate::state::AppState;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/payment/checkout-session",
            post(payment::create_checkout_session),
        )
        .route(
            "/api/payment/checkout-session/:session_id",
            get(payment::checkout_status),
        )
        .route(
            "/api/payment/payment-intent",
            post(payment::create_payment_intent),
        )
        .route("/api/webhooks/stripe", post(webhooks::stripe_webhook))
}
