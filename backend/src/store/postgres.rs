//! PostgreSQL implementation of the reservation store

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    pre_dispute_after, DisputePatch, DocumentReview, NewAuditNote, NewDispute, NewDocument,
    NewFraudFlag, NewPayment, NewReservation, NewVoucher, PaymentWrite, ReservationStore,
    StatusPatch, StoreError, StoreResult, VoucherPatch, WebhookProcessingResult,
};
use crate::lifecycle::ReservationStatus;
use crate::models::{
    AuditEntityType, AuditNote, AvailabilitySlot, Cotista, DevelopmentSummary, Dispute,
    DisputeStatus, Document, DocumentStatus, FraudFlag, FraudStatus, Payment, PaymentStatus,
    Reservation, Voucher, VoucherStatus,
};

pub(crate) const RESERVATION_COLUMNS: &str = "id, customer_id, development_id, cotista_id, availability_id, \
    start_date, end_date, total_price, currency, status, pre_dispute_status, payment_intent_id, \
    cancellation_reason, refund_amount, refunded_at, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, reservation_id, customer_id, amount, currency, payment_method, \
    external_payment_id, status, failure_reason, created_at, updated_at";

pub(crate) const DOCUMENT_COLUMNS: &str = "id, reservation_id, customer_id, document_type, file_url, file_key, \
    status, rejection_reason, reviewed_by, reviewed_at, created_at, updated_at";

pub(crate) const VOUCHER_COLUMNS: &str = "id, reservation_id, cotista_id, file_url, file_key, status, notes, \
    rejection_reason, reviewed_by, reviewed_at, delivered_at, deadline, overdue_flagged_at, \
    created_at, updated_at";

pub(crate) const DISPUTE_COLUMNS: &str = "id, reservation_id, reported_by, reported_against, reason, \
    description, status, resolution, resolved_by, resolved_at, created_at, updated_at";

pub(crate) const FRAUD_FLAG_COLUMNS: &str = "id, user_id, reservation_id, flag_type, severity, description, \
    status, resolved_by, resolved_at, created_at, updated_at";

const AUDIT_NOTE_COLUMNS: &str =
    "id, entity_type, entity_id, actor_id, actor_kind, action, notes, metadata, created_at";

pub(crate) const COTISTA_COLUMNS: &str = "id, user_id, development_id, status, personal_data, \
    ownership_proof, bank_details, address_proof, identity_documents, terms_accepted, \
    terms_accepted_at, rejection_reason, created_at, updated_at";

/// Store backed by the shared connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn insert_note<'e, E>(executor: E, note: &NewAuditNote) -> StoreResult<AuditNote>
where
    E: sqlx::PgExecutor<'e>,
{
    let sql = format!(
        "INSERT INTO audit_notes (id, entity_type, entity_id, actor_id, actor_kind, action, notes, metadata) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
        AUDIT_NOTE_COLUMNS
    );
    let row = sqlx::query_as::<_, AuditNote>(&sql)
        .bind(Uuid::new_v4())
        .bind(note.entity_type)
        .bind(note.entity_id)
        .bind(note.actor.user_id())
        .bind(note.actor.kind())
        .bind(&note.action)
        .bind(&note.notes)
        .bind(&note.metadata)
        .fetch_one(executor)
        .await?;
    Ok(row)
}

#[async_trait]
impl ReservationStore for PgStore {
    async fn get_development(&self, id: Uuid) -> StoreResult<Option<DevelopmentSummary>> {
        let row = sqlx::query_as::<_, DevelopmentSummary>(
            "SELECT id, slug, name_key, city_id, is_active FROM developments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_cotista(&self, id: Uuid) -> StoreResult<Option<Cotista>> {
        let sql = format!("SELECT {} FROM cotistas WHERE id = $1", COTISTA_COLUMNS);
        Ok(sqlx::query_as::<_, Cotista>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_cotista_by_user(&self, user_id: Uuid) -> StoreResult<Option<Cotista>> {
        let sql = format!("SELECT {} FROM cotistas WHERE user_id = $1", COTISTA_COLUMNS);
        Ok(sqlx::query_as::<_, Cotista>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_availability(&self, id: Uuid) -> StoreResult<Option<AvailabilitySlot>> {
        let row = sqlx::query_as::<_, AvailabilitySlot>(
            r#"
            SELECT a.id, a.cotista_id, a.development_id, a.start_date, a.end_date,
                   a.price_per_night, a.is_published, a.is_booked, c.status AS cotista_status
            FROM cotista_availability a
            JOIN cotistas c ON c.id = a.cotista_id
            WHERE a.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn create_reservation(&self, new: NewReservation) -> StoreResult<Reservation> {
        let mut tx = self.pool.begin().await?;

        let booked: Option<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            UPDATE cotista_availability
            SET is_booked = TRUE, updated_at = NOW()
            WHERE id = $1 AND is_booked = FALSE AND is_published = TRUE
            RETURNING cotista_id, development_id
            "#,
        )
        .bind(new.availability_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (cotista_id, development_id) = booked.ok_or_else(|| {
            StoreError::Conflict("Availability slot is no longer available".to_string())
        })?;

        let sql = format!(
            "INSERT INTO reservations (id, customer_id, development_id, cotista_id, availability_id, \
             start_date, end_date, total_price, currency, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'created') RETURNING {}",
            RESERVATION_COLUMNS
        );
        let reservation = sqlx::query_as::<_, Reservation>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.customer_id)
            .bind(development_id)
            .bind(cotista_id)
            .bind(new.availability_id)
            .bind(new.start_date)
            .bind(new.end_date)
            .bind(new.total_price)
            .bind(&new.currency)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(reservation)
    }

    async fn get_reservation(&self, id: Uuid) -> StoreResult<Option<Reservation>> {
        let sql = format!("SELECT {} FROM reservations WHERE id = $1", RESERVATION_COLUMNS);
        Ok(sqlx::query_as::<_, Reservation>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_reservations_by_customer(
        &self,
        customer_id: Uuid,
    ) -> StoreResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {} FROM reservations WHERE customer_id = $1 ORDER BY created_at DESC",
            RESERVATION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Reservation>(&sql)
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn apply_transition(
        &self,
        id: Uuid,
        expected: ReservationStatus,
        patch: StatusPatch,
        note: NewAuditNote,
    ) -> StoreResult<Option<Reservation>> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(Option<ReservationStatus>,)> = sqlx::query_as(
            "SELECT pre_dispute_status FROM reservations WHERE id = $1 AND status = $2 FOR UPDATE",
        )
        .bind(id)
        .bind(expected)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((stored_pre_dispute,)) = current else {
            return Ok(None);
        };
        let pre_dispute = pre_dispute_after(expected, patch.next, stored_pre_dispute);

        let sql = format!(
            r#"
            UPDATE reservations
            SET status = $3,
                pre_dispute_status = $4,
                payment_intent_id = COALESCE($5, payment_intent_id),
                cancellation_reason = COALESCE($6, cancellation_reason),
                refund_amount = COALESCE($7, refund_amount),
                refunded_at = CASE WHEN $3 = 'refunded'::reservation_status THEN NOW() ELSE refunded_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            RESERVATION_COLUMNS
        );
        let updated = sqlx::query_as::<_, Reservation>(&sql)
            .bind(id)
            .bind(expected)
            .bind(patch.next)
            .bind(pre_dispute)
            .bind(&patch.payment_intent_id)
            .bind(&patch.cancellation_reason)
            .bind(patch.refund_amount)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(reservation) = updated else {
            return Ok(None);
        };

        insert_note(&mut *tx, &note).await?;

        if matches!(
            patch.next,
            ReservationStatus::Cancelled | ReservationStatus::Refunded
        ) {
            sqlx::query(
                "UPDATE cotista_availability SET is_booked = FALSE, updated_at = NOW() WHERE id = $1",
            )
            .bind(reservation.availability_id)
            .execute(&mut *tx)
            .await?;
        }

        if patch.next == ReservationStatus::Refunded {
            sqlx::query(
                "UPDATE payments SET status = 'refunded', updated_at = NOW() \
                 WHERE reservation_id = $1 AND status = 'completed'",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(reservation))
    }

    async fn list_reservations_due_for_completion(
        &self,
        today: NaiveDate,
    ) -> StoreResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {} FROM reservations WHERE status = 'voucher_delivered' AND end_date < $1",
            RESERVATION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Reservation>(&sql)
            .bind(today)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn upsert_completed_payment(&self, new: NewPayment) -> StoreResult<PaymentWrite> {
        let insert = format!(
            "INSERT INTO payments (id, reservation_id, customer_id, amount, currency, payment_method, \
             external_payment_id, status) VALUES ($1, $2, $3, $4, $5, $6, $7, 'completed') \
             ON CONFLICT (external_payment_id) DO NOTHING RETURNING {}",
            PAYMENT_COLUMNS
        );
        let inserted = sqlx::query_as::<_, Payment>(&insert)
            .bind(Uuid::new_v4())
            .bind(new.reservation_id)
            .bind(new.customer_id)
            .bind(new.amount)
            .bind(&new.currency)
            .bind(&new.payment_method)
            .bind(&new.external_payment_id)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(payment) = inserted {
            return Ok(PaymentWrite {
                payment,
                changed: true,
            });
        }

        let update = format!(
            "UPDATE payments SET status = 'completed', failure_reason = NULL, updated_at = NOW() \
             WHERE external_payment_id = $1 AND status <> 'completed' RETURNING {}",
            PAYMENT_COLUMNS
        );
        let updated = sqlx::query_as::<_, Payment>(&update)
            .bind(&new.external_payment_id)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(payment) = updated {
            return Ok(PaymentWrite {
                payment,
                changed: true,
            });
        }

        let payment = self
            .find_payment_by_external_id(&new.external_payment_id)
            .await?
            .ok_or_else(|| StoreError::NotFound("Payment".to_string()))?;
        Ok(PaymentWrite {
            payment,
            changed: false,
        })
    }

    async fn insert_payment(&self, new: NewPayment) -> StoreResult<Payment> {
        let sql = format!(
            "INSERT INTO payments (id, reservation_id, customer_id, amount, currency, payment_method, \
             external_payment_id, status) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            PAYMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Payment>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.reservation_id)
            .bind(new.customer_id)
            .bind(new.amount)
            .bind(&new.currency)
            .bind(&new.payment_method)
            .bind(&new.external_payment_id)
            .bind(new.status)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn find_payment_by_external_id(
        &self,
        external_id: &str,
    ) -> StoreResult<Option<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE external_payment_id = $1",
            PAYMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Payment>(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn transition_payment(
        &self,
        external_id: &str,
        from: &[PaymentStatus],
        to: PaymentStatus,
        failure_reason: Option<String>,
    ) -> StoreResult<Option<Payment>> {
        let sql = format!(
            "UPDATE payments SET status = $3, failure_reason = COALESCE($4, failure_reason), \
             updated_at = NOW() WHERE external_payment_id = $1 AND status = ANY($2) RETURNING {}",
            PAYMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Payment>(&sql)
            .bind(external_id)
            .bind(from.to_vec())
            .bind(to)
            .bind(failure_reason)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_payments(&self, reservation_id: Uuid) -> StoreResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE reservation_id = $1 ORDER BY created_at",
            PAYMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Payment>(&sql)
            .bind(reservation_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn insert_document(&self, new: NewDocument) -> StoreResult<Document> {
        let sql = format!(
            "INSERT INTO documents (id, reservation_id, customer_id, document_type, file_url, file_key, status) \
             VALUES ($1, $2, $3, $4, $5, $6, 'pending') RETURNING {}",
            DOCUMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Document>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.reservation_id)
            .bind(new.customer_id)
            .bind(new.document_type)
            .bind(&new.file_url)
            .bind(&new.file_key)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn get_document(&self, id: Uuid) -> StoreResult<Option<Document>> {
        let sql = format!("SELECT {} FROM documents WHERE id = $1", DOCUMENT_COLUMNS);
        Ok(sqlx::query_as::<_, Document>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_documents(&self, reservation_id: Uuid) -> StoreResult<Vec<Document>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE reservation_id = $1 ORDER BY created_at",
            DOCUMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Document>(&sql)
            .bind(reservation_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn submit_pending_documents(&self, reservation_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE documents SET status = 'under_review', updated_at = NOW() \
             WHERE reservation_id = $1 AND status = 'pending'",
        )
        .bind(reservation_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn review_document(
        &self,
        id: Uuid,
        expected: DocumentStatus,
        review: DocumentReview,
    ) -> StoreResult<Option<Document>> {
        let sql = format!(
            "UPDATE documents SET status = $3, reviewed_by = $4, reviewed_at = NOW(), \
             rejection_reason = $5, updated_at = NOW() WHERE id = $1 AND status = $2 RETURNING {}",
            DOCUMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Document>(&sql)
            .bind(id)
            .bind(expected)
            .bind(review.status)
            .bind(review.reviewed_by)
            .bind(&review.rejection_reason)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn restore_document(
        &self,
        previous: &Document,
        current: DocumentStatus,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE documents SET status = $3, reviewed_by = $4, reviewed_at = $5, \
             rejection_reason = $6, updated_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(previous.id)
        .bind(current)
        .bind(previous.status)
        .bind(previous.reviewed_by)
        .bind(previous.reviewed_at)
        .bind(&previous.rejection_reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_document(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_voucher(&self, new: NewVoucher) -> StoreResult<Voucher> {
        let sql = format!(
            "INSERT INTO vouchers (id, reservation_id, cotista_id, status, deadline) \
             VALUES ($1, $2, $3, 'pending', $4) RETURNING {}",
            VOUCHER_COLUMNS
        );
        sqlx::query_as::<_, Voucher>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.reservation_id)
            .bind(new.cotista_id)
            .bind(new.deadline)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => {
                    StoreError::Conflict("Reservation already has a voucher".to_string())
                }
                other => other,
            })
    }

    async fn get_voucher(&self, id: Uuid) -> StoreResult<Option<Voucher>> {
        let sql = format!("SELECT {} FROM vouchers WHERE id = $1", VOUCHER_COLUMNS);
        Ok(sqlx::query_as::<_, Voucher>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_voucher_by_reservation(
        &self,
        reservation_id: Uuid,
    ) -> StoreResult<Option<Voucher>> {
        let sql = format!(
            "SELECT {} FROM vouchers WHERE reservation_id = $1",
            VOUCHER_COLUMNS
        );
        Ok(sqlx::query_as::<_, Voucher>(&sql)
            .bind(reservation_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn update_voucher(
        &self,
        id: Uuid,
        expected: &[VoucherStatus],
        patch: VoucherPatch,
    ) -> StoreResult<Option<Voucher>> {
        let sql = format!(
            r#"
            UPDATE vouchers
            SET status = $3,
                file_url = COALESCE($4, file_url),
                file_key = COALESCE($5, file_key),
                notes = COALESCE($6, notes),
                rejection_reason = CASE WHEN $3 = 'rejected'::voucher_status THEN $7 ELSE NULL END,
                reviewed_by = COALESCE($8, reviewed_by),
                reviewed_at = CASE WHEN $8 IS NULL THEN reviewed_at ELSE NOW() END,
                delivered_at = CASE WHEN $3 = 'delivered'::voucher_status THEN NOW() ELSE delivered_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            RETURNING {}
            "#,
            VOUCHER_COLUMNS
        );
        Ok(sqlx::query_as::<_, Voucher>(&sql)
            .bind(id)
            .bind(expected.to_vec())
            .bind(patch.status)
            .bind(&patch.file_url)
            .bind(&patch.file_key)
            .bind(&patch.notes)
            .bind(&patch.rejection_reason)
            .bind(patch.reviewed_by)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn restore_voucher(&self, previous: &Voucher, current: VoucherStatus) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE vouchers
            SET status = $3, file_url = $4, file_key = $5, notes = $6, rejection_reason = $7,
                reviewed_by = $8, reviewed_at = $9, delivered_at = $10, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(previous.id)
        .bind(current)
        .bind(previous.status)
        .bind(&previous.file_url)
        .bind(&previous.file_key)
        .bind(&previous.notes)
        .bind(&previous.rejection_reason)
        .bind(previous.reviewed_by)
        .bind(previous.reviewed_at)
        .bind(previous.delivered_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_overdue_vouchers(&self, now: DateTime<Utc>) -> StoreResult<Vec<Voucher>> {
        let sql = format!(
            "SELECT {} FROM vouchers WHERE status IN ('pending', 'rejected') \
             AND deadline < $1 AND overdue_flagged_at IS NULL",
            VOUCHER_COLUMNS
        );
        Ok(sqlx::query_as::<_, Voucher>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn mark_voucher_overdue_flagged(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE vouchers SET overdue_flagged_at = NOW() WHERE id = $1 AND overdue_flagged_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_vouchers_awaiting_delivery(&self) -> StoreResult<Vec<Voucher>> {
        let sql = format!(
            "SELECT {} FROM vouchers WHERE status = 'approved'",
            VOUCHER_COLUMNS
        );
        Ok(sqlx::query_as::<_, Voucher>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn insert_dispute(&self, new: NewDispute) -> StoreResult<Dispute> {
        let sql = format!(
            "INSERT INTO disputes (id, reservation_id, reported_by, reported_against, reason, description, status) \
             VALUES ($1, $2, $3, $4, $5, $6, 'open') RETURNING {}",
            DISPUTE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Dispute>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.reservation_id)
            .bind(new.reported_by)
            .bind(new.reported_against)
            .bind(&new.reason)
            .bind(&new.description)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn get_dispute(&self, id: Uuid) -> StoreResult<Option<Dispute>> {
        let sql = format!("SELECT {} FROM disputes WHERE id = $1", DISPUTE_COLUMNS);
        Ok(sqlx::query_as::<_, Dispute>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn update_dispute(
        &self,
        id: Uuid,
        expected: &[DisputeStatus],
        patch: DisputePatch,
    ) -> StoreResult<Option<Dispute>> {
        let sql = format!(
            r#"
            UPDATE disputes
            SET status = $3,
                resolution = COALESCE($4, resolution),
                resolved_by = COALESCE($5, resolved_by),
                resolved_at = CASE WHEN $3 IN ('resolved'::dispute_status, 'closed'::dispute_status)
                                   THEN NOW() ELSE resolved_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            RETURNING {}
            "#,
            DISPUTE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Dispute>(&sql)
            .bind(id)
            .bind(expected.to_vec())
            .bind(patch.status)
            .bind(&patch.resolution)
            .bind(patch.resolved_by)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn insert_fraud_flag(&self, new: NewFraudFlag) -> StoreResult<FraudFlag> {
        let sql = format!(
            "INSERT INTO fraud_flags (id, user_id, reservation_id, flag_type, severity, description, status) \
             VALUES ($1, $2, $3, $4, $5, $6, 'open') RETURNING {}",
            FRAUD_FLAG_COLUMNS
        );
        Ok(sqlx::query_as::<_, FraudFlag>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.user_id)
            .bind(new.reservation_id)
            .bind(&new.flag_type)
            .bind(new.severity)
            .bind(&new.description)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn update_fraud_flag(
        &self,
        id: Uuid,
        expected: &[FraudStatus],
        next: FraudStatus,
        admin_id: Uuid,
    ) -> StoreResult<Option<FraudFlag>> {
        let sql = format!(
            r#"
            UPDATE fraud_flags
            SET status = $3,
                resolved_by = CASE WHEN $3 IN ('resolved'::fraud_status, 'false_positive'::fraud_status)
                                   THEN $4 ELSE resolved_by END,
                resolved_at = CASE WHEN $3 IN ('resolved'::fraud_status, 'false_positive'::fraud_status)
                                   THEN NOW() ELSE resolved_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            RETURNING {}
            "#,
            FRAUD_FLAG_COLUMNS
        );
        Ok(sqlx::query_as::<_, FraudFlag>(&sql)
            .bind(id)
            .bind(expected.to_vec())
            .bind(next)
            .bind(admin_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn insert_audit_note(&self, new: NewAuditNote) -> StoreResult<AuditNote> {
        insert_note(&self.pool, &new).await
    }

    async fn list_audit_notes(
        &self,
        entity_type: AuditEntityType,
        entity_id: Uuid,
    ) -> StoreResult<Vec<AuditNote>> {
        let sql = format!(
            "SELECT {} FROM audit_notes WHERE entity_type = $1 AND entity_id = $2 ORDER BY created_at",
            AUDIT_NOTE_COLUMNS
        );
        Ok(sqlx::query_as::<_, AuditNote>(&sql)
            .bind(entity_type)
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn claim_webhook_event(&self, event_id: &str, event_type: &str) -> StoreResult<bool> {
        // Re-claim ids whose last attempt failed, or that have been stuck in
        // processing long enough that the worker is presumed dead.
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO webhook_events (id, gateway_event_id, event_type, processing_result)
            VALUES ($1, $2, $3, 'processing')
            ON CONFLICT (gateway_event_id) DO UPDATE SET
                processing_result = 'processing',
                received_at = NOW(),
                error_message = NULL
            WHERE webhook_events.processing_result = 'error'
               OR (webhook_events.processing_result = 'processing'
                   AND webhook_events.received_at < NOW() - INTERVAL '30 minutes')
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event_id)
        .bind(event_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(claimed.is_some())
    }

    async fn finish_webhook_event(
        &self,
        event_id: &str,
        result: WebhookProcessingResult,
        error: Option<String>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE webhook_events SET processing_result = $2, error_message = $3, processed_at = NOW() \
             WHERE gateway_event_id = $1",
        )
        .bind(event_id)
        .bind(result)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    async fn setup_store() -> Option<PgStore> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new().connect(&url).await.ok()?;
        crate::db::run_migrations(&pool).await.ok()?;
        Some(PgStore::new(pool))
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL
    async fn test_webhook_claim_is_exclusive() {
        let Some(store) = setup_store().await else {
            return;
        };
        let event_id = format!("evt_{}", Uuid::new_v4().simple());

        assert!(store
            .claim_webhook_event(&event_id, "checkout.session.completed")
            .await
            .unwrap());
        assert!(!store
            .claim_webhook_event(&event_id, "checkout.session.completed")
            .await
            .unwrap());

        store
            .finish_webhook_event(&event_id, WebhookProcessingResult::Error, Some("boom".into()))
            .await
            .unwrap();
        assert!(store
            .claim_webhook_event(&event_id, "checkout.session.completed")
            .await
            .unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL
    async fn test_missing_reservation_transition_returns_none() {
        let Some(store) = setup_store().await else {
            return;
        };
        let id = Uuid::new_v4();
        let note = NewAuditNote::new(
            AuditEntityType::Reservation,
            id,
            crate::models::Actor::System,
            "test",
        );
        let result = store
            .apply_transition(
                id,
                ReservationStatus::Created,
                StatusPatch::to(ReservationStatus::Cancelled),
                note,
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
