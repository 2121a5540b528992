//! Public catalogue routes

use axum::{routing::get, Router};

use crate::handlers::catalog;
use crate::state::AppState;

pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/api/translations", get(catalog::translations))
        .route(
            "/api/translations/category/:category",
            get(catalog::translations_by_category),
        )
        .route("/api/countries", get(catalog::countries))
        .route("/api/countries/:id/states", get(catalog::states))
        .route("/api/states/:id/cities", get(catalog::cities))
        .route("/api/cities/slug/:slug", get(catalog::city_by_slug))
        .route("/api/cities/:id/developments", get(catalog::developments_by_city))
        .route("/api/developments", get(catalog::developments))
        .route("/api/developments/slug/:slug", get(catalog::development_by_slug))
        .route("/api/developments/:id", get(catalog::development_by_id))
        .route(
            "/api/developments/:id/availability",
            get(catalog::availability),
        )
}
