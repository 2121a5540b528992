//! Customer reservation endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use super::{ok, AuthenticatedUser, JsonResult};
use crate::models::{
    ApiResponse, CreateReservationRequest, Dispute, OpenDisputeRequest, Reservation,
    ReservationDetails,
};
use crate::error::ApiResult;
use crate::state::AppState;

/// POST /api/reservations
pub async fn create_reservation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateReservationRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Reservation>>)> {
    request.validate()?;
    let reservation = state
        .reservations
        .create_reservation(user.user_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(reservation))))
}

/// GET /api/reservations
pub async fn my_reservations(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> JsonResult<Vec<Reservation>> {
    ok(state.reservations.my_reservations(user.user_id).await?)
}

/// GET /api/reservations/:id
pub async fn reservation_details(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> JsonResult<ReservationDetails> {
    let cotista = state.store.get_cotista_by_user(user.user_id).await?;
    ok(state
        .reservations
        .reservation_details(user.actor(), cotista.as_ref(), id)
        .await?)
}

/// POST /api/reservations/:id/disputes
pub async fn open_dispute(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(request): Json<OpenDisputeRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Dispute>>)> {
    request.validate()?;
    let cotista = state.store.get_cotista_by_user(user.user_id).await?;
    let dispute = state
        .reservations
        .open_dispute(user.actor(), cotista.as_ref(), id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(dispute))))
}
