//! Reservation routes for customers and cotistas

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{cotista, documents, reservations};
use crate::state::AppState;

pub fn reservation_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/reservations",
            post(reservations::create_reservation).get(reservations::my_reservations),
        )
        .route("/api/reservations/:id", get(reservations::reservation_details))
        .route(
            "/api/reservations/:id/disputes",
            post(reservations::open_dispute),
        )
        .route(
            "/api/reservations/:id/documents",
            get(documents::reservation_documents),
        )
        .route(
            "/api/reservations/:id/voucher",
            get(cotista::reservation_voucher),
        )
}
