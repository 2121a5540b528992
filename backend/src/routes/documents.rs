//! Document upload routes

use axum::{routing::post, Router};

use crate::handlers::documents;
use crate::state::AppState;

pub fn document_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/documents/customer",
            post(documents::upload_customer_document),
        )
        .route(
            "/api/documents/cotista",
            post(documents::upload_cotista_document),
        )
}
