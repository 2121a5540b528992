//! Cotista portal routes

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::handlers::cotista;
use crate::state::AppState;

pub fn cotista_routes() -> Router<AppState> {
    Router::new()
        .route("/api/cotista/register", post(cotista::register))
        .route("/api/cotista/profile", get(cotista::profile))
        .route("/api/cotista/dashboard", get(cotista::dashboard))
        .route("/api/cotista/reservations", get(cotista::reservations))
        .route(
            "/api/cotista/availability",
            get(cotista::availability).post(cotista::create_availability),
        )
        .route(
            "/api/cotista/availability/:id",
            patch(cotista::set_published),
        )
        .route("/api/cotista/vouchers", post(cotista::upload_voucher))
}
