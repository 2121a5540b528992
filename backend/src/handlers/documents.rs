//! Document upload and review endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use super::{ok, AdminUser, AuthenticatedUser, JsonResult};
use crate::error::ApiResult;
use crate::models::{
    ApiResponse, CotistaDocumentUpload, CustomerDocumentUpload, Document, ReviewDecision,
};
use crate::state::AppState;
use crate::storage::StoredObject;

/// POST /api/documents/customer
pub async fn upload_customer_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(upload): Json<CustomerDocumentUpload>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Document>>)> {
    upload.validate()?;
    let document = state
        .documents
        .upload_customer_document(user.user_id, upload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(document))))
}

/// POST /api/documents/cotista
pub async fn upload_cotista_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(upload): Json<CotistaDocumentUpload>,
) -> JsonResult<StoredObject> {
    upload.validate()?;
    ok(state
        .documents
        .upload_cotista_document(user.user_id, upload)
        .await?)
}

/// GET /api/reservations/:id/documents
pub async fn reservation_documents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(reservation_id): Path<Uuid>,
) -> JsonResult<Vec<Document>> {
    ok(state
        .documents
        .documents_for(user.actor(), reservation_id)
        .await?)
}

/// POST /api/admin/documents/:id/review
pub async fn review_document(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(document_id): Path<Uuid>,
    Json(decision): Json<ReviewDecision>,
) -> JsonResult<Document> {
    ok(state
        .documents
        .review_document(admin.actor(), document_id, decision)
        .await?)
}
