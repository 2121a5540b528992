//! Back-office endpoints. Every handler requires the admin role.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use super::{ok, AdminUser, JsonResult};
use crate::admin::{ActiveFraudFlag, PendingCotista, PendingDocument, PendingVoucher};
use crate::error::ApiResult;
use crate::models::{
    AdminDashboard, ApiResponse, AuditNote, AuditTrailQuery, CancelReservationRequest, Cotista,
    CreateFraudFlagRequest, Dispute, FraudFlag, RefundReservationRequest, Reservation,
    ResolveDisputeRequest, ReviewDecision, UpdateFraudFlagRequest, Voucher,
};
use crate::state::AppState;

pub async fn dashboard(State(state): State<AppState>, _admin: AdminUser) -> JsonResult<AdminDashboard> {
    ok(state.admin.dashboard().await?)
}

pub async fn pending_documents(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> JsonResult<Vec<PendingDocument>> {
    ok(state.admin.pending_documents().await?)
}

pub async fn pending_cotistas(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> JsonResult<Vec<PendingCotista>> {
    ok(state.admin.pending_cotistas().await?)
}

pub async fn pending_vouchers(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> JsonResult<Vec<PendingVoucher>> {
    ok(state.admin.pending_vouchers().await?)
}

pub async fn open_disputes(State(state): State<AppState>, _admin: AdminUser) -> JsonResult<Vec<Dispute>> {
    ok(state.admin.open_disputes().await?)
}

pub async fn fraud_flags(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> JsonResult<Vec<ActiveFraudFlag>> {
    ok(state.admin.active_fraud_flags().await?)
}

pub async fn review_cotista(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(cotista_id): Path<Uuid>,
    Json(decision): Json<ReviewDecision>,
) -> JsonResult<Cotista> {
    ok(state
        .admin
        .review_cotista(admin.actor(), cotista_id, decision)
        .await?)
}

pub async fn start_voucher_review(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(voucher_id): Path<Uuid>,
) -> JsonResult<Voucher> {
    ok(state.vouchers.start_review(admin.actor(), voucher_id).await?)
}

pub async fn review_voucher(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(voucher_id): Path<Uuid>,
    Json(decision): Json<ReviewDecision>,
) -> JsonResult<Voucher> {
    ok(state
        .vouchers
        .review_voucher(admin.actor(), voucher_id, decision)
        .await?)
}

/// Re-opens the voucher request for an approved reservation
pub async fn request_voucher(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(reservation_id): Path<Uuid>,
) -> JsonResult<Voucher> {
    ok(state
        .vouchers
        .request_voucher(reservation_id, admin.actor())
        .await?)
}

pub async fn deliver_voucher(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(voucher_id): Path<Uuid>,
) -> JsonResult<Voucher> {
    ok(state.vouchers.deliver_voucher(voucher_id, admin.actor()).await?)
}

pub async fn resolve_dispute(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(dispute_id): Path<Uuid>,
    Json(request): Json<ResolveDisputeRequest>,
) -> JsonResult<Dispute> {
    request.validate()?;
    ok(state
        .admin
        .resolve_dispute(admin.actor(), dispute_id, request)
        .await?)
}

pub async fn escalate_dispute(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(dispute_id): Path<Uuid>,
) -> JsonResult<Dispute> {
    ok(state.admin.escalate_dispute(admin.actor(), dispute_id).await?)
}

pub async fn create_fraud_flag(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(request): Json<CreateFraudFlagRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<FraudFlag>>)> {
    request.validate()?;
    let flag = state.admin.create_fraud_flag(admin.actor(), request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(flag))))
}

pub async fn update_fraud_flag(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(flag_id): Path<Uuid>,
    Json(request): Json<UpdateFraudFlagRequest>,
) -> JsonResult<FraudFlag> {
    ok(state
        .admin
        .resolve_fraud_flag(admin.actor(), flag_id, request.status)
        .await?)
}

pub async fn cancel_reservation(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(reservation_id): Path<Uuid>,
    Json(request): Json<CancelReservationRequest>,
) -> JsonResult<Reservation> {
    request.validate()?;
    ok(state
        .admin
        .cancel_reservation(admin.actor(), reservation_id, request)
        .await?)
}

pub async fn refund_reservation(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(reservation_id): Path<Uuid>,
    Json(request): Json<RefundReservationRequest>,
) -> JsonResult<Reservation> {
    request.validate()?;
    ok(state
        .admin
        .refund_reservation(admin.actor(), reservation_id, request)
        .await?)
}

pub async fn audit_trail(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<AuditTrailQuery>,
) -> JsonResult<Vec<AuditNote>> {
    ok(state
        .admin
        .audit_trail(query.entity_type, query.entity_id)
        .await?)
}
