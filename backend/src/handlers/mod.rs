//! HTTP handlers, one module per API group

use axum::Json;

use crate::error::ApiResult;
use crate::models::ApiResponse;

pub mod admin;
pub mod auth;
pub mod catalog;
pub mod cotista;
pub mod documents;
pub mod health;
pub mod payment;
pub mod reservations;
pub mod webhooks;

pub use crate::middleware::auth::{AdminUser, AuthenticatedUser, CotistaUser, OptionalUser};

/// Standard success envelope
pub type JsonResult<T> = ApiResult<Json<ApiResponse<T>>>;

pub(crate) fn ok<T>(data: T) -> JsonResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}
