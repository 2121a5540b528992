//! Back-office routes

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{admin, documents};
use crate::state::AppState;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/dashboard", get(admin::dashboard))
        .route("/api/admin/documents/pending", get(admin::pending_documents))
        .route(
            "/api/admin/documents/:id/review",
            post(documents::review_document),
        )
        .route("/api/admin/cotistas/pending", get(admin::pending_cotistas))
        .route("/api/admin/cotistas/:id/review", post(admin::review_cotista))
        .route("/api/admin/vouchers/pending", get(admin::pending_vouchers))
        .route(
            "/api/admin/vouchers/:id/start-review",
            post(admin::start_voucher_review),
        )
        .route("/api/admin/vouchers/:id/review", post(admin::review_voucher))
        .route("/api/admin/vouchers/:id/deliver", post(admin::deliver_voucher))
        .route("/api/admin/disputes", get(admin::open_disputes))
        .route("/api/admin/disputes/:id/resolve", post(admin::resolve_dispute))
        .route(
            "/api/admin/disputes/:id/escalate",
            post(admin::escalate_dispute),
        )
        .route(
            "/api/admin/fraud-flags",
            get(admin::fraud_flags).post(admin::create_fraud_flag),
        )
        .route("/api/admin/fraud-flags/:id", post(admin::update_fraud_flag))
        .route(
            "/api/admin/reservations/:id/cancel",
            post(admin::cancel_reservation),
        )
        .route(
            "/api/admin/reservations/:id/refund",
            post(admin::refund_reservation),
        )
        .route(
            "/api/admin/reservations/:id/request-voucher",
            post(admin::request_voucher),
        )
        .route("/api/admin/audit", get(admin::audit_trail))
}
