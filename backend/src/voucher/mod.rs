//! Stay vouchers issued by cotistas
//!
//! Once a reservation's documents are approved a voucher is requested from the
//! cotista, who uploads it before a deadline. An admin reviews the upload and
//! approval delivers it to the customer. Every voucher status change is
//! mirrored on the reservation through the lifecycle manager.

use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::documents::{UploadPipeline, DOCUMENT_TYPES};
use crate::error::{ApiError, ApiResult};
use crate::lifecycle::{ensure_can_apply, LifecycleEvent, LifecycleManager, TransitionRequest};
use crate::models::{
    Actor, AuditEntityType, Cotista, Reservation, ReviewDecision, UserRole, Voucher,
    VoucherStatus, VoucherUpload,
};
use crate::store::{NewAuditNote, NewVoucher, ReservationStore, VoucherPatch};

#[derive(Clone)]
pub struct VoucherService {
    store: Arc<dyn ReservationStore>,
    lifecycle: LifecycleManager,
    uploads: UploadPipeline,
    deadline_hours: i64,
    max_file_mb: u64,
}

impl VoucherService {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        lifecycle: LifecycleManager,
        uploads: UploadPipeline,
        deadline_hours: i64,
        max_file_mb: u64,
    ) -> Self {
        Self {
            store,
            lifecycle,
            uploads,
            deadline_hours,
            max_file_mb,
        }
    }

    async fn reservation(&self, id: Uuid) -> ApiResult<Reservation> {
        self.store
            .get_reservation(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Reservation {}", id)))
    }

    async fn voucher(&self, id: Uuid) -> ApiResult<Voucher> {
        self.store
            .get_voucher(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Voucher {}", id)))
    }

    async fn audit(&self, voucher: &Voucher, actor: Actor, action: &str, notes: Option<String>) {
        let note = NewAuditNote::new(AuditEntityType::Voucher, voucher.id, actor, action)
            .with_notes(notes)
            .with_metadata(json!({
                "reservation_id": voucher.reservation_id,
                "status": voucher.status,
            }));
        if let Err(e) = self.store.insert_audit_note(note).await {
            tracing::error!(voucher_id = %voucher.id, error = %e, "Failed to record voucher audit note");
        }
    }

    /// Moves the reservation along with a voucher change. When the reservation
    /// refuses, the voucher is put back to `previous`; the error carries
    /// whether that restore happened.
    async fn mirror(
        &self,
        previous: &Voucher,
        current: VoucherStatus,
        request: TransitionRequest,
    ) -> Result<(), (ApiError, bool)> {
        let Err(e) = self
            .lifecycle
            .transition(previous.reservation_id, request)
            .await
        else {
            return Ok(());
        };

        let restored = match self.store.restore_voucher(previous, current).await {
            Ok(restored) => restored,
            Err(restore_err) => {
                tracing::error!(voucher_id = %previous.id, error = %restore_err, "Failed to undo voucher change");
                false
            }
        };
        tracing::warn!(
            voucher_id = %previous.id,
            restored,
            error = %e,
            "Reservation refused voucher change"
        );
        Err((e.into(), restored))
    }

    /// Opens the voucher for an approved reservation and starts the
    /// cotista's deadline. Re-requesting reuses an existing voucher.
    pub async fn request_voucher(&self, reservation_id: Uuid, actor: Actor) -> ApiResult<Voucher> {
        let reservation = self.reservation(reservation_id).await?;
        ensure_can_apply(reservation.status, &LifecycleEvent::VoucherRequested)?;

        let voucher = match self.store.get_voucher_by_reservation(reservation_id).await? {
            Some(existing) => existing,
            None => {
                self.store
                    .insert_voucher(NewVoucher {
                        reservation_id,
                        cotista_id: reservation.cotista_id,
                        deadline: Utc::now() + Duration::hours(self.deadline_hours),
                    })
                    .await?
            }
        };

        self.lifecycle
            .transition(
                reservation_id,
                TransitionRequest::new(LifecycleEvent::VoucherRequested, actor),
            )
            .await?;

        tracing::info!(
            reservation_id = %reservation_id,
            voucher_id = %voucher.id,
            deadline = %voucher.deadline,
            "Voucher requested from cotista"
        );
        Ok(voucher)
    }

    /// Cotista uploads (or re-uploads after rejection) the voucher file
    pub async fn upload_voucher(&self, cotista: &Cotista, upload: VoucherUpload) -> ApiResult<Voucher> {
        let reservation = self.reservation(upload.reservation_id).await?;
        if reservation.cotista_id != cotista.id {
            return Err(ApiError::Forbidden(
                "Reservation belongs to another cotista".to_string(),
            ));
        }
        ensure_can_apply(reservation.status, &LifecycleEvent::VoucherUploaded)?;

        let voucher = self
            .store
            .get_voucher_by_reservation(reservation.id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Voucher".to_string()))?;

        let prepared = self
            .uploads
            .prepare(&upload.file, &DOCUMENT_TYPES, self.max_file_mb)?;
        let stored = self.uploads.upload("vouchers", cotista.user_id, prepared).await?;

        let patch = VoucherPatch {
            file_url: Some(stored.url.clone()),
            file_key: Some(stored.key.clone()),
            notes: upload.notes,
            ..VoucherPatch::status(VoucherStatus::Sent)
        };
        let updated = match self
            .store
            .update_voucher(
                voucher.id,
                &[VoucherStatus::Pending, VoucherStatus::Rejected],
                patch,
            )
            .await
        {
            Ok(Some(v)) => v,
            Ok(None) => {
                self.uploads.discard(&stored.key).await;
                return Err(ApiError::Conflict(
                    "Voucher is not awaiting an upload".to_string(),
                ));
            }
            Err(e) => {
                self.uploads.discard(&stored.key).await;
                return Err(e.into());
            }
        };

        let actor = Actor::user(cotista.user_id, UserRole::Cotista);
        let request = TransitionRequest::new(LifecycleEvent::VoucherUploaded, actor);
        if let Err((e, restored)) = self.mirror(&voucher, updated.status, request).await {
            if restored {
                self.uploads.discard(&stored.key).await;
            }
            return Err(e);
        }
        self.audit(&updated, actor, "voucher_uploaded", None).await;

        Ok(updated)
    }

    /// Admin picks up a sent voucher
    pub async fn start_review(&self, admin: Actor, voucher_id: Uuid) -> ApiResult<Voucher> {
        let voucher = self.voucher(voucher_id).await?;
        let reservation = self.reservation(voucher.reservation_id).await?;
        ensure_can_apply(reservation.status, &LifecycleEvent::VoucherReviewStarted)?;

        let patch = VoucherPatch {
            reviewed_by: admin.user_id(),
            ..VoucherPatch::status(VoucherStatus::UnderReview)
        };
        let updated = self
            .store
            .update_voucher(voucher_id, &[VoucherStatus::Sent], patch)
            .await?
            .ok_or_else(|| ApiError::Conflict("Voucher is not awaiting review".to_string()))?;

        let request = TransitionRequest::new(LifecycleEvent::VoucherReviewStarted, admin);
        self.mirror(&voucher, updated.status, request)
            .await
            .map_err(|(e, _)| e)?;
        self.audit(&updated, admin, "voucher_review_started", None).await;
        Ok(updated)
    }

    /// Approval delivers the voucher straight away. A failed delivery is left
    /// for the sweeper to retry.
    pub async fn review_voucher(
        &self,
        admin: Actor,
        voucher_id: Uuid,
        decision: ReviewDecision,
    ) -> ApiResult<Voucher> {
        let voucher = self.voucher(voucher_id).await?;
        let reservation = self.reservation(voucher.reservation_id).await?;
        let reviewable = [VoucherStatus::Sent, VoucherStatus::UnderReview];

        match decision {
            ReviewDecision::Approve => {
                ensure_can_apply(reservation.status, &LifecycleEvent::VoucherApproved)?;
                let patch = VoucherPatch {
                    reviewed_by: admin.user_id(),
                    ..VoucherPatch::status(VoucherStatus::Approved)
                };
                let approved = self
                    .store
                    .update_voucher(voucher_id, &reviewable, patch)
                    .await?
                    .ok_or_else(|| {
                        ApiError::Conflict("Voucher is not awaiting review".to_string())
                    })?;
                let request = TransitionRequest::new(LifecycleEvent::VoucherApproved, admin);
                self.mirror(&voucher, approved.status, request)
                    .await
                    .map_err(|(e, _)| e)?;
                self.audit(&approved, admin, "voucher_approved", None).await;

                match self.deliver_voucher(voucher_id, admin).await {
                    Ok(delivered) => Ok(delivered),
                    Err(e) => {
                        tracing::warn!(voucher_id = %voucher_id, error = %e, "Voucher delivery deferred");
                        Ok(approved)
                    }
                }
            }
            ReviewDecision::Reject { reason } => {
                if reason.trim().is_empty() {
                    return Err(ApiError::BadRequest(
                        "A rejection reason is required".to_string(),
                    ));
                }
                ensure_can_apply(reservation.status, &LifecycleEvent::VoucherRejected)?;
                let patch = VoucherPatch {
                    reviewed_by: admin.user_id(),
                    rejection_reason: Some(reason.clone()),
                    ..VoucherPatch::status(VoucherStatus::Rejected)
                };
                let rejected = self
                    .store
                    .update_voucher(voucher_id, &reviewable, patch)
                    .await?
                    .ok_or_else(|| {
                        ApiError::Conflict("Voucher is not awaiting review".to_string())
                    })?;
                let request = TransitionRequest::new(LifecycleEvent::VoucherRejected, admin)
                    .reason(reason.clone());
                self.mirror(&voucher, rejected.status, request)
                    .await
                    .map_err(|(e, _)| e)?;
                self.audit(&rejected, admin, "voucher_rejected", Some(reason))
                    .await;
                Ok(rejected)
            }
        }
    }

    /// Marks an approved voucher delivered and advances the reservation.
    /// Safe to call again for a voucher that is already delivered.
    pub async fn deliver_voucher(&self, voucher_id: Uuid, actor: Actor) -> ApiResult<Voucher> {
        let voucher = self.voucher(voucher_id).await?;
        let reservation = self.reservation(voucher.reservation_id).await?;
        ensure_can_apply(reservation.status, &LifecycleEvent::VoucherDelivered)?;

        let request = TransitionRequest::new(LifecycleEvent::VoucherDelivered, actor);
        let delivered = if voucher.status == VoucherStatus::Delivered {
            self.lifecycle.transition(reservation.id, request).await?;
            voucher
        } else {
            let delivered = self
                .store
                .update_voucher(
                    voucher_id,
                    &[VoucherStatus::Approved],
                    VoucherPatch::status(VoucherStatus::Delivered),
                )
                .await?
                .ok_or_else(|| ApiError::Conflict("Voucher is not approved".to_string()))?;
            self.mirror(&voucher, delivered.status, request)
                .await
                .map_err(|(e, _)| e)?;
            self.audit(&delivered, actor, "voucher_delivered", None).await;
            delivered
        };

        tracing::info!(
            voucher_id = %voucher_id,
            reservation_id = %reservation.id,
            "Voucher delivered to customer"
        );
        Ok(delivered)
    }

    /// The voucher for a reservation, visible to its customer, its cotista
    /// and admins
    pub async fn voucher_for(
        &self,
        actor: Actor,
        cotista: Option<&Cotista>,
        reservation_id: Uuid,
    ) -> ApiResult<Option<Voucher>> {
        let reservation = self.reservation(reservation_id).await?;
        let is_cotista = cotista.is_some_and(|c| c.id == reservation.cotista_id);
        if !actor.owns_or_admin(reservation.customer_id) && !is_cotista {
            return Err(ApiError::Forbidden(
                "Not allowed to view this voucher".to_string(),
            ));
        }
        Ok(self.store.get_voucher_by_reservation(reservation_id).await?)
    }
}
