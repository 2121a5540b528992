//! Customer verification documents

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::upload::UploadPipeline;
use super::validation::DOCUMENT_TYPES;
use crate::error::{ApiError, ApiResult};
use crate::lifecycle::{
    ensure_can_apply, LifecycleEvent, LifecycleManager, ReservationStatus, TransitionRequest,
};
use crate::models::{
    required_documents_satisfied, Actor, AuditEntityType, CotistaDocumentUpload,
    CustomerDocumentUpload, Document, DocumentStatus, Reservation, ReviewDecision, UserRole,
};
use crate::storage::StoredObject;
use crate::store::{DocumentReview, NewAuditNote, NewDocument, ReservationStore};
use crate::voucher::VoucherService;

#[derive(Clone)]
pub struct DocumentService {
    store: Arc<dyn ReservationStore>,
    lifecycle: LifecycleManager,
    uploads: UploadPipeline,
    vouchers: VoucherService,
    max_file_mb: u64,
}

impl DocumentService {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        lifecycle: LifecycleManager,
        uploads: UploadPipeline,
        vouchers: VoucherService,
        max_file_mb: u64,
    ) -> Self {
        Self {
            store,
            lifecycle,
            uploads,
            vouchers,
            max_file_mb,
        }
    }

    async fn reservation(&self, id: Uuid) -> ApiResult<Reservation> {
        self.store
            .get_reservation(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Reservation {}", id)))
    }

    /// Stores a customer document for their own paid reservation.
    ///
    /// The file is validated before anything is written. Once every required
    /// type has a live document the set is submitted for review.
    pub async fn upload_customer_document(
        &self,
        customer_id: Uuid,
        upload: CustomerDocumentUpload,
    ) -> ApiResult<Document> {
        let reservation = self.reservation(upload.reservation_id).await?;
        if reservation.customer_id != customer_id {
            return Err(ApiError::Forbidden(
                "Reservation belongs to another customer".to_string(),
            ));
        }

        let prepared = self
            .uploads
            .prepare(&upload.file, &DOCUMENT_TYPES, self.max_file_mb)?;
        ensure_can_apply(reservation.status, &LifecycleEvent::DocumentsSubmitted)?;

        let stored = self
            .uploads
            .upload("customer-documents", customer_id, prepared)
            .await?;

        let document = match self
            .store
            .insert_document(NewDocument {
                reservation_id: reservation.id,
                customer_id,
                document_type: upload.document_type,
                file_url: stored.url.clone(),
                file_key: stored.key.clone(),
            })
            .await
        {
            Ok(document) => document,
            Err(e) => {
                self.uploads.discard(&stored.key).await;
                return Err(e.into());
            }
        };

        let actor = Actor::user(customer_id, UserRole::User);
        let documents = self.store.list_documents(reservation.id).await?;
        let complete = required_documents_satisfied(&documents, |s| s.is_live())
            || reservation.status == ReservationStatus::DocumentsUnderReview;

        let event = if complete {
            let submitted = self.store.submit_pending_documents(reservation.id).await?;
            tracing::info!(
                reservation_id = %reservation.id,
                submitted,
                "Document set complete, submitted for review"
            );
            LifecycleEvent::DocumentsSubmitted
        } else {
            LifecycleEvent::DocumentUploaded
        };
        if let Err(e) = self
            .lifecycle
            .transition(reservation.id, TransitionRequest::new(event, actor))
            .await
        {
            if let Err(cleanup) = self.store.delete_document(document.id).await {
                tracing::error!(document_id = %document.id, error = %cleanup, "Failed to remove document after a refused upload");
            } else {
                self.uploads.discard(&stored.key).await;
            }
            return Err(e.into());
        }

        if let Err(e) = self
            .store
            .insert_audit_note(
                NewAuditNote::new(AuditEntityType::Document, document.id, actor, "document_uploaded")
                    .with_metadata(json!({
                        "reservation_id": reservation.id,
                        "document_type": document.document_type,
                    })),
            )
            .await
        {
            tracing::error!(document_id = %document.id, error = %e, "Failed to record document audit note");
        }

        Ok(self
            .store
            .get_document(document.id)
            .await?
            .unwrap_or(document))
    }

    /// Registration documents for a cotista profile. Only the file is stored;
    /// the returned URL is recorded on the profile by the caller.
    pub async fn upload_cotista_document(
        &self,
        user_id: Uuid,
        upload: CotistaDocumentUpload,
    ) -> ApiResult<StoredObject> {
        let prepared = self
            .uploads
            .prepare(&upload.file, &DOCUMENT_TYPES, self.max_file_mb)?;
        let stored = self
            .uploads
            .upload("cotista-documents", user_id, prepared)
            .await?;
        tracing::info!(
            user_id = %user_id,
            document_type = ?upload.document_type,
            "Cotista document stored"
        );
        Ok(stored)
    }

    pub async fn documents_for(&self, actor: Actor, reservation_id: Uuid) -> ApiResult<Vec<Document>> {
        let reservation = self.reservation(reservation_id).await?;
        if !actor.owns_or_admin(reservation.customer_id) {
            return Err(ApiError::Forbidden(
                "Not allowed to view these documents".to_string(),
            ));
        }
        Ok(self.store.list_documents(reservation_id).await?)
    }

    /// Puts a reviewed document back under review when its reservation
    /// refused the matching event
    async fn undo_review(&self, previous: &Document, current: DocumentStatus) {
        match self.store.restore_document(previous, current).await {
            Ok(true) => tracing::warn!(
                document_id = %previous.id,
                "Document review undone, reservation did not accept it"
            ),
            Ok(false) => tracing::warn!(
                document_id = %previous.id,
                "Document changed again before its review could be undone"
            ),
            Err(e) => tracing::error!(
                document_id = %previous.id,
                error = %e,
                "Failed to undo document review"
            ),
        }
    }

    /// Admin decision on a document under review.
    ///
    /// Approving the last required document approves the reservation and
    /// requests the voucher from the cotista.
    pub async fn review_document(
        &self,
        admin: Actor,
        document_id: Uuid,
        decision: ReviewDecision,
    ) -> ApiResult<Document> {
        let admin_id = admin
            .user_id()
            .ok_or_else(|| ApiError::Forbidden("Admin access required".to_string()))?;
        let document = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Document {}", document_id)))?;
        let reservation = self.reservation(document.reservation_id).await?;

        let (event, status) = match &decision {
            ReviewDecision::Approve => (LifecycleEvent::DocumentApproved, DocumentStatus::Approved),
            ReviewDecision::Reject { reason } => {
                if reason.trim().is_empty() {
                    return Err(ApiError::BadRequest(
                        "A rejection reason is required".to_string(),
                    ));
                }
                (LifecycleEvent::DocumentRejected, DocumentStatus::Rejected)
            }
        };
        ensure_can_apply(reservation.status, &event)?;

        let reviewed = self
            .store
            .review_document(
                document_id,
                DocumentStatus::UnderReview,
                DocumentReview {
                    status,
                    reviewed_by: admin_id,
                    rejection_reason: decision.rejection_reason().map(str::to_string),
                },
            )
            .await?
            .ok_or_else(|| ApiError::Conflict("Document is not under review".to_string()))?;

        let action = event.name();
        let mut request = TransitionRequest::new(event, admin);
        if let Some(reason) = decision.rejection_reason() {
            request = request.reason(reason);
        }
        let outcome = match self.lifecycle.transition(reservation.id, request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.undo_review(&document, status).await;
                return Err(e.into());
            }
        };

        self.store
            .insert_audit_note(
                NewAuditNote::new(AuditEntityType::Document, document_id, admin, action)
                    .with_notes(decision.rejection_reason().map(str::to_string))
                    .with_metadata(json!({ "reservation_id": reservation.id })),
            )
            .await?;

        if outcome.changed && outcome.to == ReservationStatus::Approved {
            self.vouchers.request_voucher(reservation.id, Actor::System).await?;
        }

        Ok(reviewed)
    }
}
