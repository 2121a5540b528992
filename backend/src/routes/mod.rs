//! Route definitions for the Temporada API

mod admin;
mod auth;
mod catalog;
mod cotista;
mod documents;
mod payment;
mod reservations;

pub use admin::admin_routes;
pub use auth::auth_routes;
pub use catalog::catalog_routes;
pub use cotista::cotista_routes;
pub use documents::document_routes;
pub use payment::payment_routes;
pub use reservations::reservation_routes;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::handlers::health;
use crate::middleware::{self, RateLimiter};
use crate::state::AppState;
use crate::websocket;

/// Base64 inflates uploads by a third; leave room for a 10 MB file plus JSON.
const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

/// Full application router with every middleware layer applied
pub fn build_router(state: AppState, rate_limiter: RateLimiter) -> Router {
    let cors = configure_cors(state.config.cors_allowed_origins.as_deref());
    let environment = state.config.environment;

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health_check))
        .route("/ws", get(websocket::ws_handler))
        .merge(auth_routes())
        .merge(catalog_routes())
        .merge(reservation_routes())
        .merge(payment_routes())
        .merge(document_routes())
        .merge(cotista_routes())
        .merge(admin_routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn_with_state(
            environment,
            middleware::security_headers,
        ))
        .layer(axum::middleware::from_fn(middleware::request_tracing))
        .layer(axum::middleware::from_fn(middleware::rate_limit_layer(
            rate_limiter,
        )))
        .layer(cors)
}

fn configure_cors(allowed_origins: Option<&str>) -> CorsLayer {
    let allowed_origins = allowed_origins.unwrap_or_default();

    if allowed_origins.trim().is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(Any)
}
