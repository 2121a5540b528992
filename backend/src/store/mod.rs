//! Persistent entity store
//!
//! Reservations and the records hanging off them (payments, documents,
//! vouchers, disputes, fraud flags, audit notes, webhook claims) are read and
//! written through [`ReservationStore`]. Every status column is updated with a
//! compare-and-swap: callers pass the status they expect and get `None` back
//! when someone else got there first.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::lifecycle::ReservationStatus;
use crate::models::{
    Actor, AuditEntityType, AuditNote, AvailabilitySlot, Cotista, DevelopmentSummary, Dispute,
    DisputeStatus, Document, DocumentStatus, DocumentType, FraudFlag, FraudSeverity, FraudStatus,
    Payment, PaymentStatus, Reservation, Voucher, VoucherStatus,
};

mod memory;
mod postgres;

pub use memory::{MemoryStore, SeededSlot};
pub use postgres::PgStore;
pub(crate) use postgres::{
    COTISTA_COLUMNS, DISPUTE_COLUMNS, DOCUMENT_COLUMNS, FRAUD_FLAG_COLUMNS, RESERVATION_COLUMNS,
    VOUCHER_COLUMNS,
};

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound("Record".to_string()),
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                StoreError::Conflict(format!("Duplicate record: {}", db.message()))
            }
            _ => StoreError::Database(err.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Write models
// ============================================================================

#[derive(Debug, Clone)]
pub struct NewReservation {
    pub customer_id: Uuid,
    pub availability_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_price: i64,
    pub currency: String,
}

/// Fields written together with a status change
#[derive(Debug, Clone)]
pub struct StatusPatch {
    pub next: ReservationStatus,
    pub payment_intent_id: Option<String>,
    pub cancellation_reason: Option<String>,
    pub refund_amount: Option<i64>,
}

impl StatusPatch {
    pub fn to(next: ReservationStatus) -> Self {
        Self {
            next,
            payment_intent_id: None,
            cancellation_reason: None,
            refund_amount: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub reservation_id: Uuid,
    pub customer_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub payment_method: Option<String>,
    pub external_payment_id: String,
    pub status: PaymentStatus,
}

/// Result of an idempotent payment write
#[derive(Debug, Clone)]
pub struct PaymentWrite {
    pub payment: Payment,
    /// False when the row already existed in the requested state
    pub changed: bool,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub reservation_id: Uuid,
    pub customer_id: Uuid,
    pub document_type: DocumentType,
    pub file_url: String,
    pub file_key: String,
}

#[derive(Debug, Clone)]
pub struct DocumentReview {
    pub status: DocumentStatus,
    pub reviewed_by: Uuid,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewVoucher {
    pub reservation_id: Uuid,
    pub cotista_id: Uuid,
    pub deadline: DateTime<Utc>,
}

/// Voucher update. `None` fields keep their current value.
#[derive(Debug, Clone)]
pub struct VoucherPatch {
    pub status: VoucherStatus,
    pub file_url: Option<String>,
    pub file_key: Option<String>,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub reviewed_by: Option<Uuid>,
}

impl VoucherPatch {
    pub fn status(status: VoucherStatus) -> Self {
        Self {
            status,
            file_url: None,
            file_key: None,
            notes: None,
            rejection_reason: None,
            reviewed_by: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewDispute {
    pub reservation_id: Uuid,
    pub reported_by: Uuid,
    pub reported_against: Option<Uuid>,
    pub reason: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct DisputePatch {
    pub status: DisputeStatus,
    pub resolution: Option<String>,
    pub resolved_by: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewFraudFlag {
    pub user_id: Option<Uuid>,
    pub reservation_id: Option<Uuid>,
    pub flag_type: String,
    pub severity: FraudSeverity,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct NewAuditNote {
    pub entity_type: AuditEntityType,
    pub entity_id: Uuid,
    pub actor: Actor,
    pub action: String,
    pub notes: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl NewAuditNote {
    pub fn new(entity_type: AuditEntityType, entity_id: Uuid, actor: Actor, action: &str) -> Self {
        Self {
            entity_type,
            entity_id,
            actor,
            action: action.to_string(),
            notes: None,
            metadata: None,
        }
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Outcome recorded against a claimed webhook event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(type_name = "webhook_processing_result", rename_all = "lowercase")]
pub enum WebhookProcessingResult {
    Processing,
    Success,
    Error,
}

/// Reservation status written by [`ReservationStore::apply_transition`].
///
/// Entering `in_dispute` remembers the previous status; leaving it clears it.
pub(crate) fn pre_dispute_after(
    current: ReservationStatus,
    next: ReservationStatus,
    stored: Option<ReservationStatus>,
) -> Option<ReservationStatus> {
    match (current, next) {
        (ReservationStatus::InDispute, ReservationStatus::InDispute) => stored,
        (_, ReservationStatus::InDispute) => Some(current),
        (ReservationStatus::InDispute, _) => None,
        _ => stored,
    }
}

/// Durable records behind the reservation lifecycle
#[async_trait]
pub trait ReservationStore: Send + Sync {
    // Catalogue lookups the booking flow needs
    async fn get_development(&self, id: Uuid) -> StoreResult<Option<DevelopmentSummary>>;
    async fn get_cotista(&self, id: Uuid) -> StoreResult<Option<Cotista>>;
    async fn get_cotista_by_user(&self, user_id: Uuid) -> StoreResult<Option<Cotista>>;
    async fn get_availability(&self, id: Uuid) -> StoreResult<Option<AvailabilitySlot>>;

    // Reservations

    /// Books the slot and inserts the reservation in `created` atomically.
    /// Fails with `Conflict` when the slot is already booked or unpublished.
    async fn create_reservation(&self, new: NewReservation) -> StoreResult<Reservation>;
    async fn get_reservation(&self, id: Uuid) -> StoreResult<Option<Reservation>>;
    async fn list_reservations_by_customer(&self, customer_id: Uuid)
        -> StoreResult<Vec<Reservation>>;

    /// Moves the reservation from `expected` to `patch.next` and records the
    /// audit note in the same unit of work. Entering `cancelled` or `refunded`
    /// frees the availability slot; entering `refunded` also marks completed
    /// payments refunded. Returns `None` when the status was not `expected`.
    async fn apply_transition(
        &self,
        id: Uuid,
        expected: ReservationStatus,
        patch: StatusPatch,
        note: NewAuditNote,
    ) -> StoreResult<Option<Reservation>>;

    /// `voucher_delivered` reservations whose stay ended before `today`
    async fn list_reservations_due_for_completion(
        &self,
        today: NaiveDate,
    ) -> StoreResult<Vec<Reservation>>;

    // Payments

    /// Inserts a completed payment for the external id, or completes the
    /// existing row. `changed` is false when it was already completed.
    async fn upsert_completed_payment(&self, new: NewPayment) -> StoreResult<PaymentWrite>;
    async fn insert_payment(&self, new: NewPayment) -> StoreResult<Payment>;
    async fn find_payment_by_external_id(&self, external_id: &str)
        -> StoreResult<Option<Payment>>;
    /// Conditional status change keyed by the gateway transaction id
    async fn transition_payment(
        &self,
        external_id: &str,
        from: &[PaymentStatus],
        to: PaymentStatus,
        failure_reason: Option<String>,
    ) -> StoreResult<Option<Payment>>;
    async fn list_payments(&self, reservation_id: Uuid) -> StoreResult<Vec<Payment>>;

    // Documents
    async fn insert_document(&self, new: NewDocument) -> StoreResult<Document>;
    async fn get_document(&self, id: Uuid) -> StoreResult<Option<Document>>;
    async fn list_documents(&self, reservation_id: Uuid) -> StoreResult<Vec<Document>>;
    /// Moves the reservation's `pending` documents to `under_review`
    async fn submit_pending_documents(&self, reservation_id: Uuid) -> StoreResult<u64>;
    async fn review_document(
        &self,
        id: Uuid,
        expected: DocumentStatus,
        review: DocumentReview,
    ) -> StoreResult<Option<Document>>;
    /// Writes `previous` back over a document that is still in `current`.
    /// Returns false when the document moved on in the meantime.
    async fn restore_document(&self, previous: &Document, current: DocumentStatus)
        -> StoreResult<bool>;
    async fn delete_document(&self, id: Uuid) -> StoreResult<bool>;

    // Vouchers

    /// Fails with `Conflict` when the reservation already has a voucher
    async fn insert_voucher(&self, new: NewVoucher) -> StoreResult<Voucher>;
    async fn get_voucher(&self, id: Uuid) -> StoreResult<Option<Voucher>>;
    async fn get_voucher_by_reservation(&self, reservation_id: Uuid)
        -> StoreResult<Option<Voucher>>;
    async fn update_voucher(
        &self,
        id: Uuid,
        expected: &[VoucherStatus],
        patch: VoucherPatch,
    ) -> StoreResult<Option<Voucher>>;
    /// Writes `previous` back over a voucher that is still in `current`
    async fn restore_voucher(&self, previous: &Voucher, current: VoucherStatus)
        -> StoreResult<bool>;
    /// Vouchers still awaiting the cotista past their deadline, not yet flagged
    async fn list_overdue_vouchers(&self, now: DateTime<Utc>) -> StoreResult<Vec<Voucher>>;
    /// Returns false when another worker flagged it first
    async fn mark_voucher_overdue_flagged(&self, id: Uuid) -> StoreResult<bool>;
    /// Approved vouchers not yet delivered
    async fn list_vouchers_awaiting_delivery(&self) -> StoreResult<Vec<Voucher>>;

    // Disputes and fraud flags
    async fn insert_dispute(&self, new: NewDispute) -> StoreResult<Dispute>;
    async fn get_dispute(&self, id: Uuid) -> StoreResult<Option<Dispute>>;
    async fn update_dispute(
        &self,
        id: Uuid,
        expected: &[DisputeStatus],
        patch: DisputePatch,
    ) -> StoreResult<Option<Dispute>>;
    async fn insert_fraud_flag(&self, new: NewFraudFlag) -> StoreResult<FraudFlag>;
    async fn update_fraud_flag(
        &self,
        id: Uuid,
        expected: &[FraudStatus],
        next: FraudStatus,
        admin_id: Uuid,
    ) -> StoreResult<Option<FraudFlag>>;

    // Audit trail
    async fn insert_audit_note(&self, new: NewAuditNote) -> StoreResult<AuditNote>;
    async fn list_audit_notes(
        &self,
        entity_type: AuditEntityType,
        entity_id: Uuid,
    ) -> StoreResult<Vec<AuditNote>>;

    // Webhook idempotency

    /// Claims a gateway event id for processing. Returns false when the id is
    /// already processed or being processed; an id whose last attempt ended
    /// in `error` can be claimed again.
    async fn claim_webhook_event(&self, event_id: &str, event_type: &str) -> StoreResult<bool>;
    async fn finish_webhook_event(
        &self,
        event_id: &str,
        result: WebhookProcessingResult,
        error: Option<String>,
    ) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReservationStatus::*;

    #[test]
    fn test_pre_dispute_status_bookkeeping() {
        assert_eq!(pre_dispute_after(VoucherSent, InDispute, None), Some(VoucherSent));
        assert_eq!(pre_dispute_after(InDispute, VoucherSent, Some(VoucherSent)), None);
        assert_eq!(pre_dispute_after(Paid, DocumentsPending, None), None);
    }
}
