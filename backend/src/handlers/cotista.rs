//! Cotista self-service endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use super::{ok, AuthenticatedUser, CotistaUser, JsonResult};
use crate::cotista::{
    CotistaDashboard, CreateAvailabilityRequest, RegisterCotistaRequest, SetPublishedRequest,
};
use crate::error::ApiResult;
use crate::models::{ApiResponse, AvailabilitySlot, Cotista, Reservation, Voucher, VoucherUpload};
use crate::state::AppState;

/// POST /api/cotista/register
pub async fn register(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<RegisterCotistaRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Cotista>>)> {
    request.validate()?;
    let cotista = state.cotistas.register(user.actor(), request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(cotista))))
}

pub async fn profile(CotistaUser { cotista, .. }: CotistaUser) -> JsonResult<Cotista> {
    ok(cotista)
}

pub async fn reservations(
    State(state): State<AppState>,
    CotistaUser { cotista, .. }: CotistaUser,
) -> JsonResult<Vec<Reservation>> {
    ok(state.cotistas.reservations(&cotista).await?)
}

pub async fn dashboard(
    State(state): State<AppState>,
    CotistaUser { cotista, .. }: CotistaUser,
) -> JsonResult<CotistaDashboard> {
    ok(state.cotistas.dashboard(&cotista).await?)
}

pub async fn availability(
    State(state): State<AppState>,
    CotistaUser { cotista, .. }: CotistaUser,
) -> JsonResult<Vec<AvailabilitySlot>> {
    ok(state.cotistas.availability(&cotista).await?)
}

pub async fn create_availability(
    State(state): State<AppState>,
    CotistaUser { cotista, .. }: CotistaUser,
    Json(request): Json<CreateAvailabilityRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<AvailabilitySlot>>)> {
    request.validate()?;
    let slot = state.cotistas.create_availability(&cotista, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(slot))))
}

pub async fn set_published(
    State(state): State<AppState>,
    CotistaUser { cotista, .. }: CotistaUser,
    Path(availability_id): Path<Uuid>,
    Json(request): Json<SetPublishedRequest>,
) -> JsonResult<AvailabilitySlot> {
    ok(state
        .cotistas
        .set_published(&cotista, availability_id, request.is_published)
        .await?)
}

/// POST /api/cotista/vouchers
pub async fn upload_voucher(
    State(state): State<AppState>,
    CotistaUser { cotista, .. }: CotistaUser,
    Json(upload): Json<VoucherUpload>,
) -> JsonResult<Voucher> {
    upload.validate()?;
    ok(state.vouchers.upload_voucher(&cotista, upload).await?)
}

/// GET /api/reservations/:id/voucher - customer, cotista or admin
pub async fn reservation_voucher(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(reservation_id): Path<Uuid>,
) -> JsonResult<Option<Voucher>> {
    let cotista = state.store.get_cotista_by_user(user.user_id).await?;
    ok(state
        .vouchers
        .voucher_for(user.actor(), cotista.as_ref(), reservation_id)
        .await?)
}
