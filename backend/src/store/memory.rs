//! In-process store used by tests and local tooling.
//!
//! Mirrors the compare-and-swap semantics of [`super::PgStore`] under a single
//! async mutex, so each trait call is one unit of work.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    pre_dispute_after, DisputePatch, DocumentReview, NewAuditNote, NewDispute, NewDocument,
    NewFraudFlag, NewPayment, NewReservation, NewVoucher, PaymentWrite, ReservationStore,
    StatusPatch, StoreError, StoreResult, VoucherPatch, WebhookProcessingResult,
};
use crate::lifecycle::ReservationStatus;
use crate::models::{
    AuditEntityType, AuditNote, AvailabilitySlot, Cotista, CotistaStatus, DevelopmentSummary,
    Dispute, DisputeStatus, Document, DocumentStatus, FraudFlag, FraudStatus, Payment,
    PaymentStatus, Reservation, Voucher, VoucherStatus,
};

/// Webhook claims older than this are presumed abandoned
const STALE_CLAIM_MINUTES: i64 = 30;

#[derive(Debug, Clone)]
struct WebhookClaim {
    result: WebhookProcessingResult,
    received_at: DateTime<Utc>,
    error: Option<String>,
}

#[derive(Default)]
struct State {
    developments: Vec<DevelopmentSummary>,
    cotistas: Vec<Cotista>,
    availability: Vec<AvailabilitySlot>,
    reservations: Vec<Reservation>,
    payments: Vec<Payment>,
    documents: Vec<Document>,
    vouchers: Vec<Voucher>,
    disputes: Vec<Dispute>,
    fraud_flags: Vec<FraudFlag>,
    audit_notes: Vec<AuditNote>,
    webhook_events: Vec<(String, WebhookClaim)>,
}

impl State {
    fn slot_view(&self, slot: &AvailabilitySlot) -> AvailabilitySlot {
        let mut view = slot.clone();
        if let Some(cotista) = self.cotistas.iter().find(|c| c.id == slot.cotista_id) {
            view.cotista_status = cotista.status;
        }
        view
    }

    fn push_note(&mut self, note: NewAuditNote) -> AuditNote {
        let row = AuditNote {
            id: Uuid::new_v4(),
            entity_type: note.entity_type,
            entity_id: note.entity_id,
            actor_id: note.actor.user_id(),
            actor_kind: note.actor.kind().to_string(),
            action: note.action,
            notes: note.notes,
            metadata: note.metadata,
            created_at: Utc::now(),
        };
        self.audit_notes.push(row.clone());
        row
    }
}

/// Catalogue rows created by [`MemoryStore::seed_bookable_slot`]
#[derive(Debug, Clone)]
pub struct SeededSlot {
    pub development_id: Uuid,
    pub cotista: Cotista,
    pub slot: AvailabilitySlot,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    lose_next_transition: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `apply_transition` reports a lost compare-and-swap, as if
    /// another writer had moved the reservation first
    pub fn lose_next_transition(&self) {
        self.lose_next_transition.store(true, Ordering::SeqCst);
    }

    pub async fn seed_development(&self, slug: &str) -> DevelopmentSummary {
        let development = DevelopmentSummary {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            name_key: format!("development.{}.name", slug),
            city_id: Uuid::new_v4(),
            is_active: true,
        };
        self.state.lock().await.developments.push(development.clone());
        development
    }

    pub async fn seed_cotista(
        &self,
        user_id: Uuid,
        development_id: Uuid,
        status: CotistaStatus,
    ) -> Cotista {
        let now = Utc::now();
        let cotista = Cotista {
            id: Uuid::new_v4(),
            user_id,
            development_id,
            status,
            personal_data: None,
            ownership_proof: None,
            bank_details: None,
            address_proof: None,
            identity_documents: None,
            terms_accepted: true,
            terms_accepted_at: Some(now),
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().await.cotistas.push(cotista.clone());
        cotista
    }

    pub async fn seed_availability(
        &self,
        cotista: &Cotista,
        start_date: NaiveDate,
        end_date: NaiveDate,
        price_per_night: i64,
    ) -> AvailabilitySlot {
        let slot = AvailabilitySlot {
            id: Uuid::new_v4(),
            cotista_id: cotista.id,
            development_id: cotista.development_id,
            start_date,
            end_date,
            price_per_night,
            is_published: true,
            is_booked: false,
            cotista_status: cotista.status,
        };
        self.state.lock().await.availability.push(slot.clone());
        slot
    }

    /// Development, approved cotista and a published slot in one call
    pub async fn seed_bookable_slot(
        &self,
        cotista_user_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        price_per_night: i64,
    ) -> SeededSlot {
        let development = self.seed_development("seeded").await;
        let cotista = self
            .seed_cotista(cotista_user_id, development.id, CotistaStatus::Approved)
            .await;
        let slot = self
            .seed_availability(&cotista, start_date, end_date, price_per_night)
            .await;
        SeededSlot {
            development_id: development.id,
            cotista,
            slot,
        }
    }

    /// Moves a voucher deadline, for exercising the overdue sweep
    pub async fn set_voucher_deadline(&self, voucher_id: Uuid, deadline: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        if let Some(v) = state.vouchers.iter_mut().find(|v| v.id == voucher_id) {
            v.deadline = deadline;
        }
    }

    pub async fn fraud_flags(&self) -> Vec<FraudFlag> {
        self.state.lock().await.fraud_flags.clone()
    }

    pub async fn webhook_result(&self, event_id: &str) -> Option<WebhookProcessingResult> {
        self.state
            .lock()
            .await
            .webhook_events
            .iter()
            .find(|(id, _)| id == event_id)
            .map(|(_, claim)| claim.result)
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn get_development(&self, id: Uuid) -> StoreResult<Option<DevelopmentSummary>> {
        let state = self.state.lock().await;
        Ok(state.developments.iter().find(|d| d.id == id).cloned())
    }

    async fn get_cotista(&self, id: Uuid) -> StoreResult<Option<Cotista>> {
        let state = self.state.lock().await;
        Ok(state.cotistas.iter().find(|c| c.id == id).cloned())
    }

    async fn get_cotista_by_user(&self, user_id: Uuid) -> StoreResult<Option<Cotista>> {
        let state = self.state.lock().await;
        Ok(state.cotistas.iter().find(|c| c.user_id == user_id).cloned())
    }

    async fn get_availability(&self, id: Uuid) -> StoreResult<Option<AvailabilitySlot>> {
        let state = self.state.lock().await;
        Ok(state
            .availability
            .iter()
            .find(|a| a.id == id)
            .map(|a| state.slot_view(a)))
    }

    async fn create_reservation(&self, new: NewReservation) -> StoreResult<Reservation> {
        let mut state = self.state.lock().await;
        let slot = state
            .availability
            .iter_mut()
            .find(|a| a.id == new.availability_id && a.is_published && !a.is_booked)
            .ok_or_else(|| {
                StoreError::Conflict("Availability slot is no longer available".to_string())
            })?;
        slot.is_booked = true;
        let (cotista_id, development_id) = (slot.cotista_id, slot.development_id);

        let now = Utc::now();
        let reservation = Reservation {
            id: Uuid::new_v4(),
            customer_id: new.customer_id,
            development_id,
            cotista_id,
            availability_id: new.availability_id,
            start_date: new.start_date,
            end_date: new.end_date,
            total_price: new.total_price,
            currency: new.currency,
            status: ReservationStatus::Created,
            pre_dispute_status: None,
            payment_intent_id: None,
            cancellation_reason: None,
            refund_amount: None,
            refunded_at: None,
            created_at: now,
            updated_at: now,
        };
        state.reservations.push(reservation.clone());
        Ok(reservation)
    }

    async fn get_reservation(&self, id: Uuid) -> StoreResult<Option<Reservation>> {
        let state = self.state.lock().await;
        Ok(state.reservations.iter().find(|r| r.id == id).cloned())
    }

    async fn list_reservations_by_customer(
        &self,
        customer_id: Uuid,
    ) -> StoreResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .iter()
            .rev()
            .filter(|r| r.customer_id == customer_id)
            .cloned()
            .collect())
    }

    async fn apply_transition(
        &self,
        id: Uuid,
        expected: ReservationStatus,
        patch: StatusPatch,
        note: NewAuditNote,
    ) -> StoreResult<Option<Reservation>> {
        if self.lose_next_transition.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let Some(reservation) = state
            .reservations
            .iter_mut()
            .find(|r| r.id == id && r.status == expected)
        else {
            return Ok(None);
        };

        reservation.pre_dispute_status =
            pre_dispute_after(expected, patch.next, reservation.pre_dispute_status);
        reservation.status = patch.next;
        if patch.payment_intent_id.is_some() {
            reservation.payment_intent_id = patch.payment_intent_id;
        }
        if patch.cancellation_reason.is_some() {
            reservation.cancellation_reason = patch.cancellation_reason;
        }
        if patch.refund_amount.is_some() {
            reservation.refund_amount = patch.refund_amount;
        }
        if patch.next == ReservationStatus::Refunded {
            reservation.refunded_at = Some(now);
        }
        reservation.updated_at = now;
        let updated = reservation.clone();

        state.push_note(note);

        if matches!(
            patch.next,
            ReservationStatus::Cancelled | ReservationStatus::Refunded
        ) {
            if let Some(slot) = state
                .availability
                .iter_mut()
                .find(|a| a.id == updated.availability_id)
            {
                slot.is_booked = false;
            }
        }

        if patch.next == ReservationStatus::Refunded {
            for payment in state
                .payments
                .iter_mut()
                .filter(|p| p.reservation_id == id && p.status == PaymentStatus::Completed)
            {
                payment.status = PaymentStatus::Refunded;
                payment.updated_at = now;
            }
        }

        Ok(Some(updated))
    }

    async fn list_reservations_due_for_completion(
        &self,
        today: NaiveDate,
    ) -> StoreResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .iter()
            .filter(|r| r.status == ReservationStatus::VoucherDelivered && r.end_date < today)
            .cloned()
            .collect())
    }

    async fn upsert_completed_payment(&self, new: NewPayment) -> StoreResult<PaymentWrite> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        if let Some(existing) = state
            .payments
            .iter_mut()
            .find(|p| p.external_payment_id.as_deref() == Some(new.external_payment_id.as_str()))
        {
            let changed = existing.status != PaymentStatus::Completed;
            if changed {
                existing.status = PaymentStatus::Completed;
                existing.failure_reason = None;
                existing.updated_at = now;
            }
            return Ok(PaymentWrite {
                payment: existing.clone(),
                changed,
            });
        }

        let payment = Payment {
            id: Uuid::new_v4(),
            reservation_id: new.reservation_id,
            customer_id: new.customer_id,
            amount: new.amount,
            currency: new.currency,
            payment_method: new.payment_method,
            external_payment_id: Some(new.external_payment_id),
            status: PaymentStatus::Completed,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        state.payments.push(payment.clone());
        Ok(PaymentWrite {
            payment,
            changed: true,
        })
    }

    async fn insert_payment(&self, new: NewPayment) -> StoreResult<Payment> {
        let mut state = self.state.lock().await;
        if state
            .payments
            .iter()
            .any(|p| p.external_payment_id.as_deref() == Some(new.external_payment_id.as_str()))
        {
            return Err(StoreError::Conflict(format!(
                "Duplicate record: payment {}",
                new.external_payment_id
            )));
        }
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            reservation_id: new.reservation_id,
            customer_id: new.customer_id,
            amount: new.amount,
            currency: new.currency,
            payment_method: new.payment_method,
            external_payment_id: Some(new.external_payment_id),
            status: new.status,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        state.payments.push(payment.clone());
        Ok(payment)
    }

    async fn find_payment_by_external_id(
        &self,
        external_id: &str,
    ) -> StoreResult<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .find(|p| p.external_payment_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn transition_payment(
        &self,
        external_id: &str,
        from: &[PaymentStatus],
        to: PaymentStatus,
        failure_reason: Option<String>,
    ) -> StoreResult<Option<Payment>> {
        let mut state = self.state.lock().await;
        let Some(payment) = state.payments.iter_mut().find(|p| {
            p.external_payment_id.as_deref() == Some(external_id) && from.contains(&p.status)
        }) else {
            return Ok(None);
        };
        payment.status = to;
        if failure_reason.is_some() {
            payment.failure_reason = failure_reason;
        }
        payment.updated_at = Utc::now();
        Ok(Some(payment.clone()))
    }

    async fn list_payments(&self, reservation_id: Uuid) -> StoreResult<Vec<Payment>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.reservation_id == reservation_id)
            .cloned()
            .collect())
    }

    async fn insert_document(&self, new: NewDocument) -> StoreResult<Document> {
        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4(),
            reservation_id: new.reservation_id,
            customer_id: new.customer_id,
            document_type: new.document_type,
            file_url: new.file_url,
            file_key: new.file_key,
            status: DocumentStatus::Pending,
            rejection_reason: None,
            reviewed_by: None,
            reviewed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().await.documents.push(document.clone());
        Ok(document)
    }

    async fn get_document(&self, id: Uuid) -> StoreResult<Option<Document>> {
        let state = self.state.lock().await;
        Ok(state.documents.iter().find(|d| d.id == id).cloned())
    }

    async fn list_documents(&self, reservation_id: Uuid) -> StoreResult<Vec<Document>> {
        let state = self.state.lock().await;
        Ok(state
            .documents
            .iter()
            .filter(|d| d.reservation_id == reservation_id)
            .cloned()
            .collect())
    }

    async fn submit_pending_documents(&self, reservation_id: Uuid) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut moved = 0;
        for document in state.documents.iter_mut().filter(|d| {
            d.reservation_id == reservation_id && d.status == DocumentStatus::Pending
        }) {
            document.status = DocumentStatus::UnderReview;
            document.updated_at = now;
            moved += 1;
        }
        Ok(moved)
    }

    async fn review_document(
        &self,
        id: Uuid,
        expected: DocumentStatus,
        review: DocumentReview,
    ) -> StoreResult<Option<Document>> {
        let mut state = self.state.lock().await;
        let Some(document) = state
            .documents
            .iter_mut()
            .find(|d| d.id == id && d.status == expected)
        else {
            return Ok(None);
        };
        let now = Utc::now();
        document.status = review.status;
        document.reviewed_by = Some(review.reviewed_by);
        document.reviewed_at = Some(now);
        document.rejection_reason = review.rejection_reason;
        document.updated_at = now;
        Ok(Some(document.clone()))
    }

    async fn restore_document(
        &self,
        previous: &Document,
        current: DocumentStatus,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let Some(document) = state
            .documents
            .iter_mut()
            .find(|d| d.id == previous.id && d.status == current)
        else {
            return Ok(false);
        };
        document.status = previous.status;
        document.reviewed_by = previous.reviewed_by;
        document.reviewed_at = previous.reviewed_at;
        document.rejection_reason = previous.rejection_reason.clone();
        document.updated_at = Utc::now();
        Ok(true)
    }

    async fn delete_document(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let before = state.documents.len();
        state.documents.retain(|d| d.id != id);
        Ok(state.documents.len() < before)
    }

    async fn insert_voucher(&self, new: NewVoucher) -> StoreResult<Voucher> {
        let mut state = self.state.lock().await;
        if state
            .vouchers
            .iter()
            .any(|v| v.reservation_id == new.reservation_id)
        {
            return Err(StoreError::Conflict(
                "Reservation already has a voucher".to_string(),
            ));
        }
        let now = Utc::now();
        let voucher = Voucher {
            id: Uuid::new_v4(),
            reservation_id: new.reservation_id,
            cotista_id: new.cotista_id,
            file_url: None,
            file_key: None,
            status: VoucherStatus::Pending,
            notes: None,
            rejection_reason: None,
            reviewed_by: None,
            reviewed_at: None,
            delivered_at: None,
            deadline: new.deadline,
            overdue_flagged_at: None,
            created_at: now,
            updated_at: now,
        };
        state.vouchers.push(voucher.clone());
        Ok(voucher)
    }

    async fn get_voucher(&self, id: Uuid) -> StoreResult<Option<Voucher>> {
        let state = self.state.lock().await;
        Ok(state.vouchers.iter().find(|v| v.id == id).cloned())
    }

    async fn get_voucher_by_reservation(
        &self,
        reservation_id: Uuid,
    ) -> StoreResult<Option<Voucher>> {
        let state = self.state.lock().await;
        Ok(state
            .vouchers
            .iter()
            .find(|v| v.reservation_id == reservation_id)
            .cloned())
    }

    async fn update_voucher(
        &self,
        id: Uuid,
        expected: &[VoucherStatus],
        patch: VoucherPatch,
    ) -> StoreResult<Option<Voucher>> {
        let mut state = self.state.lock().await;
        let Some(voucher) = state
            .vouchers
            .iter_mut()
            .find(|v| v.id == id && expected.contains(&v.status))
        else {
            return Ok(None);
        };
        let now = Utc::now();
        voucher.status = patch.status;
        if patch.file_url.is_some() {
            voucher.file_url = patch.file_url;
        }
        if patch.file_key.is_some() {
            voucher.file_key = patch.file_key;
        }
        if patch.notes.is_some() {
            voucher.notes = patch.notes;
        }
        voucher.rejection_reason = if patch.status == VoucherStatus::Rejected {
            patch.rejection_reason
        } else {
            None
        };
        if patch.reviewed_by.is_some() {
            voucher.reviewed_by = patch.reviewed_by;
            voucher.reviewed_at = Some(now);
        }
        if patch.status == VoucherStatus::Delivered {
            voucher.delivered_at = Some(now);
        }
        voucher.updated_at = now;
        Ok(Some(voucher.clone()))
    }

    async fn restore_voucher(&self, previous: &Voucher, current: VoucherStatus) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let Some(voucher) = state
            .vouchers
            .iter_mut()
            .find(|v| v.id == previous.id && v.status == current)
        else {
            return Ok(false);
        };
        *voucher = Voucher {
            updated_at: Utc::now(),
            ..previous.clone()
        };
        Ok(true)
    }

    async fn list_overdue_vouchers(&self, now: DateTime<Utc>) -> StoreResult<Vec<Voucher>> {
        let state = self.state.lock().await;
        Ok(state
            .vouchers
            .iter()
            .filter(|v| {
                matches!(v.status, VoucherStatus::Pending | VoucherStatus::Rejected)
                    && v.deadline < now
                    && v.overdue_flagged_at.is_none()
            })
            .cloned()
            .collect())
    }

    async fn mark_voucher_overdue_flagged(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        match state
            .vouchers
            .iter_mut()
            .find(|v| v.id == id && v.overdue_flagged_at.is_none())
        {
            Some(voucher) => {
                voucher.overdue_flagged_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_vouchers_awaiting_delivery(&self) -> StoreResult<Vec<Voucher>> {
        let state = self.state.lock().await;
        Ok(state
            .vouchers
            .iter()
            .filter(|v| v.status == VoucherStatus::Approved)
            .cloned()
            .collect())
    }

    async fn insert_dispute(&self, new: NewDispute) -> StoreResult<Dispute> {
        let now = Utc::now();
        let dispute = Dispute {
            id: Uuid::new_v4(),
            reservation_id: new.reservation_id,
            reported_by: new.reported_by,
            reported_against: new.reported_against,
            reason: new.reason,
            description: new.description,
            status: DisputeStatus::Open,
            resolution: None,
            resolved_by: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().await.disputes.push(dispute.clone());
        Ok(dispute)
    }

    async fn get_dispute(&self, id: Uuid) -> StoreResult<Option<Dispute>> {
        let state = self.state.lock().await;
        Ok(state.disputes.iter().find(|d| d.id == id).cloned())
    }

    async fn update_dispute(
        &self,
        id: Uuid,
        expected: &[DisputeStatus],
        patch: DisputePatch,
    ) -> StoreResult<Option<Dispute>> {
        let mut state = self.state.lock().await;
        let Some(dispute) = state
            .disputes
            .iter_mut()
            .find(|d| d.id == id && expected.contains(&d.status))
        else {
            return Ok(None);
        };
        let now = Utc::now();
        dispute.status = patch.status;
        if patch.resolution.is_some() {
            dispute.resolution = patch.resolution;
        }
        if patch.resolved_by.is_some() {
            dispute.resolved_by = patch.resolved_by;
        }
        if matches!(patch.status, DisputeStatus::Resolved | DisputeStatus::Closed) {
            dispute.resolved_at = Some(now);
        }
        dispute.updated_at = now;
        Ok(Some(dispute.clone()))
    }

    async fn insert_fraud_flag(&self, new: NewFraudFlag) -> StoreResult<FraudFlag> {
        let now = Utc::now();
        let flag = FraudFlag {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            reservation_id: new.reservation_id,
            flag_type: new.flag_type,
            severity: new.severity,
            description: new.description,
            status: FraudStatus::Open,
            resolved_by: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().await.fraud_flags.push(flag.clone());
        Ok(flag)
    }

    async fn update_fraud_flag(
        &self,
        id: Uuid,
        expected: &[FraudStatus],
        next: FraudStatus,
        admin_id: Uuid,
    ) -> StoreResult<Option<FraudFlag>> {
        let mut state = self.state.lock().await;
        let Some(flag) = state
            .fraud_flags
            .iter_mut()
            .find(|f| f.id == id && expected.contains(&f.status))
        else {
            return Ok(None);
        };
        let now = Utc::now();
        flag.status = next;
        if matches!(next, FraudStatus::Resolved | FraudStatus::FalsePositive) {
            flag.resolved_by = Some(admin_id);
            flag.resolved_at = Some(now);
        }
        flag.updated_at = now;
        Ok(Some(flag.clone()))
    }

    async fn insert_audit_note(&self, new: NewAuditNote) -> StoreResult<AuditNote> {
        Ok(self.state.lock().await.push_note(new))
    }

    async fn list_audit_notes(
        &self,
        entity_type: AuditEntityType,
        entity_id: Uuid,
    ) -> StoreResult<Vec<AuditNote>> {
        let state = self.state.lock().await;
        Ok(state
            .audit_notes
            .iter()
            .filter(|n| n.entity_type == entity_type && n.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn claim_webhook_event(&self, event_id: &str, _event_type: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let stale_before = now - Duration::minutes(STALE_CLAIM_MINUTES);

        if let Some((_, claim)) = state.webhook_events.iter_mut().find(|(id, _)| id == event_id) {
            let reclaimable = match claim.result {
                WebhookProcessingResult::Error => true,
                WebhookProcessingResult::Processing => claim.received_at < stale_before,
                WebhookProcessingResult::Success => false,
            };
            if reclaimable {
                claim.result = WebhookProcessingResult::Processing;
                claim.received_at = now;
                claim.error = None;
            }
            return Ok(reclaimable);
        }

        state.webhook_events.push((
            event_id.to_string(),
            WebhookClaim {
                result: WebhookProcessingResult::Processing,
                received_at: now,
                error: None,
            },
        ));
        Ok(true)
    }

    async fn finish_webhook_event(
        &self,
        event_id: &str,
        result: WebhookProcessingResult,
        error: Option<String>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some((_, claim)) = state.webhook_events.iter_mut().find(|(id, _)| id == event_id) {
            claim.result = result;
            claim.error = error;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Actor;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn new_reservation(customer_id: Uuid, availability_id: Uuid) -> NewReservation {
        NewReservation {
            customer_id,
            availability_id,
            start_date: day(1),
            end_date: day(4),
            total_price: 30_000,
            currency: "usd".to_string(),
        }
    }

    #[tokio::test]
    async fn test_slot_cannot_be_booked_twice() {
        let store = MemoryStore::new();
        let seeded = store
            .seed_bookable_slot(Uuid::new_v4(), day(1), day(10), 10_000)
            .await;

        store
            .create_reservation(new_reservation(Uuid::new_v4(), seeded.slot.id))
            .await
            .unwrap();
        let second = store
            .create_reservation(new_reservation(Uuid::new_v4(), seeded.slot.id))
            .await;
        assert!(matches!(second, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_stale_expected_status_is_rejected() {
        let store = MemoryStore::new();
        let seeded = store
            .seed_bookable_slot(Uuid::new_v4(), day(1), day(10), 10_000)
            .await;
        let reservation = store
            .create_reservation(new_reservation(Uuid::new_v4(), seeded.slot.id))
            .await
            .unwrap();
        let note = || {
            NewAuditNote::new(
                AuditEntityType::Reservation,
                reservation.id,
                Actor::System,
                "test",
            )
        };

        let moved = store
            .apply_transition(
                reservation.id,
                ReservationStatus::Created,
                StatusPatch::to(ReservationStatus::PaymentPending),
                note(),
            )
            .await
            .unwrap();
        assert!(moved.is_some());

        let stale = store
            .apply_transition(
                reservation.id,
                ReservationStatus::Created,
                StatusPatch::to(ReservationStatus::Cancelled),
                note(),
            )
            .await
            .unwrap();
        assert!(stale.is_none());

        let notes = store
            .list_audit_notes(AuditEntityType::Reservation, reservation.id)
            .await
            .unwrap();
        assert_eq!(notes.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_releases_slot() {
        let store = MemoryStore::new();
        let seeded = store
            .seed_bookable_slot(Uuid::new_v4(), day(1), day(10), 10_000)
            .await;
        let reservation = store
            .create_reservation(new_reservation(Uuid::new_v4(), seeded.slot.id))
            .await
            .unwrap();
        assert!(!store
            .get_availability(seeded.slot.id)
            .await
            .unwrap()
            .unwrap()
            .is_bookable());

        store
            .apply_transition(
                reservation.id,
                ReservationStatus::Created,
                StatusPatch::to(ReservationStatus::Cancelled),
                NewAuditNote::new(
                    AuditEntityType::Reservation,
                    reservation.id,
                    Actor::System,
                    "cancel",
                ),
            )
            .await
            .unwrap();

        assert!(store
            .get_availability(seeded.slot.id)
            .await
            .unwrap()
            .unwrap()
            .is_bookable());
    }

    #[tokio::test]
    async fn test_completed_payment_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let new = NewPayment {
            reservation_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            amount: 35_000,
            currency: "usd".to_string(),
            payment_method: Some("card".to_string()),
            external_payment_id: "pi_123".to_string(),
            status: PaymentStatus::Completed,
        };

        assert!(store.upsert_completed_payment(new.clone()).await.unwrap().changed);
        assert!(!store.upsert_completed_payment(new.clone()).await.unwrap().changed);
        assert_eq!(store.list_payments(new.reservation_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_errored_webhook_can_be_reclaimed() {
        let store = MemoryStore::new();
        assert!(store.claim_webhook_event("evt_1", "x").await.unwrap());
        assert!(!store.claim_webhook_event("evt_1", "x").await.unwrap());

        store
            .finish_webhook_event("evt_1", WebhookProcessingResult::Error, None)
            .await
            .unwrap();
        assert!(store.claim_webhook_event("evt_1", "x").await.unwrap());

        store
            .finish_webhook_event("evt_1", WebhookProcessingResult::Success, None)
            .await
            .unwrap();
        assert!(!store.claim_webhook_event("evt_1", "x").await.unwrap());
    }
}
