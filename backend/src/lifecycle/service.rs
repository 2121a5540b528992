//! Applies lifecycle events to stored reservations

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::{
    next_status, KeyedLocks, LifecycleError, LifecycleEvent, ReservationStatus, TransitionContext,
};
use crate::models::{
    required_documents_satisfied, Actor, AuditEntityType, DocumentStatus, PaymentStatus,
    Reservation, VoucherStatus,
};
use crate::store::{NewAuditNote, ReservationStore, StatusPatch};
use crate::websocket::{ReservationEvent, WsState};

/// An event plus the data written alongside the status change
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub event: LifecycleEvent,
    pub actor: Actor,
    /// Free text kept on the audit note
    pub reason: Option<String>,
    pub payment_intent_id: Option<String>,
    pub cancellation_reason: Option<String>,
    pub refund_amount: Option<i64>,
}

impl TransitionRequest {
    pub fn new(event: LifecycleEvent, actor: Actor) -> Self {
        Self {
            event,
            actor,
            reason: None,
            payment_intent_id: None,
            cancellation_reason: None,
            refund_amount: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn payment_intent(mut self, id: Option<String>) -> Self {
        self.payment_intent_id = id;
        self
    }

    pub fn cancellation(mut self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        self.reason = Some(reason.clone());
        self.cancellation_reason = Some(reason);
        self
    }

    pub fn refund(mut self, amount: i64) -> Self {
        self.refund_amount = Some(amount);
        self
    }
}

#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub reservation: Reservation,
    pub from: ReservationStatus,
    pub to: ReservationStatus,
    /// False when the event was accepted without a status change
    pub changed: bool,
}

/// Single entry point for reservation status changes.
///
/// Transitions on one reservation are serialized in-process, and the store's
/// compare-and-swap catches writers in other processes.
#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<dyn ReservationStore>,
    locks: KeyedLocks,
    ws: WsState,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn ReservationStore>, ws: WsState) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            ws,
        }
    }

    pub fn store(&self) -> &Arc<dyn ReservationStore> {
        &self.store
    }

    pub async fn transition(
        &self,
        reservation_id: Uuid,
        request: TransitionRequest,
    ) -> Result<TransitionOutcome, LifecycleError> {
        let _guard = self.locks.lock(reservation_id).await;

        let reservation = self
            .store
            .get_reservation(reservation_id)
            .await?
            .ok_or(LifecycleError::NotFound(reservation_id))?;
        let from = reservation.status;

        if self.is_replayed_payment(&reservation, &request.event).await? {
            tracing::info!(
                reservation_id = %reservation_id,
                status = %from,
                "Payment already applied, ignoring replay"
            );
            return Ok(TransitionOutcome {
                reservation,
                from,
                to: from,
                changed: false,
            });
        }

        let ctx = self.context_for(&reservation, &request.event).await?;
        let to = next_status(from, &request.event, &ctx)
            .map_err(|why| LifecycleError::rejected(from, &request.event, why))?;

        if to == from {
            tracing::debug!(
                reservation_id = %reservation_id,
                status = %from,
                event = request.event.name(),
                "Event accepted without status change"
            );
            return Ok(TransitionOutcome {
                reservation,
                from,
                to,
                changed: false,
            });
        }

        let patch = StatusPatch {
            next: to,
            payment_intent_id: request.payment_intent_id,
            cancellation_reason: request.cancellation_reason,
            refund_amount: request.refund_amount,
        };
        let note = NewAuditNote::new(
            AuditEntityType::Reservation,
            reservation_id,
            request.actor,
            request.event.name(),
        )
        .with_notes(request.reason)
        .with_metadata(json!({
            "from": from,
            "to": to,
            "event": request.event.name(),
        }));

        let updated = self
            .store
            .apply_transition(reservation_id, from, patch, note)
            .await?
            .ok_or(LifecycleError::Conflict(reservation_id))?;

        tracing::info!(
            reservation_id = %reservation_id,
            from = %from,
            to = %to,
            event = request.event.name(),
            actor = request.actor.kind(),
            "Reservation status changed"
        );

        self.ws.broadcast_event(ReservationEvent {
            reservation_id,
            customer_id: updated.customer_id,
            from,
            to,
            event: request.event.name(),
            at: Utc::now(),
        });

        Ok(TransitionOutcome {
            reservation: updated,
            from,
            to,
            changed: true,
        })
    }

    /// A success for a payment this reservation has already moved past
    async fn is_replayed_payment(
        &self,
        reservation: &Reservation,
        event: &LifecycleEvent,
    ) -> Result<bool, LifecycleError> {
        let LifecycleEvent::PaymentSucceeded {
            external_payment_id,
        } = event
        else {
            return Ok(false);
        };
        if reservation.status.is_awaiting_payment() {
            return Ok(false);
        }
        let payment = self
            .store
            .find_payment_by_external_id(external_payment_id)
            .await?;
        Ok(payment.is_some_and(|p| {
            p.reservation_id == reservation.id && p.status == PaymentStatus::Completed
        }))
    }

    /// Reads only what the event's guard needs
    async fn context_for(
        &self,
        reservation: &Reservation,
        event: &LifecycleEvent,
    ) -> Result<TransitionContext, LifecycleError> {
        let mut ctx = TransitionContext {
            pre_dispute_status: reservation.pre_dispute_status,
            ..TransitionContext::default()
        };

        match event {
            LifecycleEvent::PaymentSucceeded {
                external_payment_id,
            } => {
                let payment = self
                    .store
                    .find_payment_by_external_id(external_payment_id)
                    .await?;
                ctx.payment_recorded = payment.is_some_and(|p| {
                    p.reservation_id == reservation.id && p.status == PaymentStatus::Completed
                });
            }
            LifecycleEvent::RefundIssued => {
                let payments = self.store.list_payments(reservation.id).await?;
                ctx.payment_recorded = payments
                    .iter()
                    .any(|p| p.status == PaymentStatus::Completed);
            }
            LifecycleEvent::DocumentApproved => {
                let documents = self.store.list_documents(reservation.id).await?;
                ctx.required_documents_approved =
                    required_documents_satisfied(&documents, |s| s == DocumentStatus::Approved);
            }
            LifecycleEvent::VoucherDelivered => {
                let voucher = self.store.get_voucher_by_reservation(reservation.id).await?;
                ctx.voucher_delivered =
                    voucher.is_some_and(|v| v.status == VoucherStatus::Delivered);
            }
            _ => {}
        }

        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentType, UserRole};
    use crate::store::{DocumentReview, MemoryStore, NewDocument, NewPayment, NewReservation};
    use chrono::NaiveDate;

    struct Fixture {
        store: Arc<MemoryStore>,
        manager: LifecycleManager,
        reservation: Reservation,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let manager = LifecycleManager::new(store.clone(), WsState::new());
        let start = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 7, 8).unwrap();
        let seeded = store.seed_bookable_slot(Uuid::new_v4(), start, end, 5_000).await;
        let reservation = store
            .create_reservation(NewReservation {
                customer_id: Uuid::new_v4(),
                availability_id: seeded.slot.id,
                start_date: start,
                end_date: end,
                total_price: 35_000,
                currency: "usd".to_string(),
            })
            .await
            .unwrap();
        Fixture {
            store,
            manager,
            reservation,
        }
    }

    async fn pay(f: &Fixture, external_id: &str) -> TransitionOutcome {
        f.store
            .upsert_completed_payment(NewPayment {
                reservation_id: f.reservation.id,
                customer_id: f.reservation.customer_id,
                amount: f.reservation.total_price,
                currency: "usd".to_string(),
                payment_method: Some("card".to_string()),
                external_payment_id: external_id.to_string(),
                status: PaymentStatus::Completed,
            })
            .await
            .unwrap();
        f.manager
            .transition(
                f.reservation.id,
                TransitionRequest::new(
                    LifecycleEvent::PaymentSucceeded {
                        external_payment_id: external_id.to_string(),
                    },
                    Actor::Gateway,
                ),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_payment_success_requires_recorded_payment() {
        let f = fixture().await;
        let err = f
            .manager
            .transition(
                f.reservation.id,
                TransitionRequest::new(
                    LifecycleEvent::PaymentSucceeded {
                        external_payment_id: "pi_missing".to_string(),
                    },
                    Actor::Gateway,
                ),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::PreconditionFailed { .. }));

        let outcome = pay(&f, "pi_1").await;
        assert!(outcome.changed);
        assert_eq!(outcome.to, ReservationStatus::Paid);
    }

    #[tokio::test]
    async fn test_replayed_payment_is_a_no_op() {
        let f = fixture().await;
        pay(&f, "pi_1").await;
        let replay = pay(&f, "pi_1").await;
        assert!(!replay.changed);
        assert_eq!(replay.reservation.status, ReservationStatus::Paid);

        let notes = f
            .store
            .list_audit_notes(AuditEntityType::Reservation, f.reservation.id)
            .await
            .unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].actor_kind, "gateway");
    }

    #[tokio::test]
    async fn test_invalid_event_leaves_reservation_untouched() {
        let f = fixture().await;
        let err = f
            .manager
            .transition(
                f.reservation.id,
                TransitionRequest::new(LifecycleEvent::StayCompleted, Actor::System),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));

        let stored = f.store.get_reservation(f.reservation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Created);
    }

    #[tokio::test]
    async fn test_documents_gate_approval() {
        let f = fixture().await;
        pay(&f, "pi_1").await;
        let admin = Actor::user(Uuid::new_v4(), UserRole::Admin);

        let mut ids = Vec::new();
        for document_type in DocumentType::REQUIRED {
            let doc = f
                .store
                .insert_document(NewDocument {
                    reservation_id: f.reservation.id,
                    customer_id: f.reservation.customer_id,
                    document_type,
                    file_url: "https://files/x".to_string(),
                    file_key: "x".to_string(),
                })
                .await
                .unwrap();
            ids.push(doc.id);
        }
        f.store.submit_pending_documents(f.reservation.id).await.unwrap();
        f.manager
            .transition(
                f.reservation.id,
                TransitionRequest::new(LifecycleEvent::DocumentsSubmitted, admin),
            )
            .await
            .unwrap();

        let mut last = None;
        for id in ids {
            f.store
                .review_document(
                    id,
                    DocumentStatus::UnderReview,
                    DocumentReview {
                        status: DocumentStatus::Approved,
                        reviewed_by: Uuid::new_v4(),
                        rejection_reason: None,
                    },
                )
                .await
                .unwrap();
            let outcome = f
                .manager
                .transition(
                    f.reservation.id,
                    TransitionRequest::new(LifecycleEvent::DocumentApproved, admin),
                )
                .await
                .unwrap();
            last = Some(outcome.to);
            if last != Some(ReservationStatus::Approved) {
                assert!(!outcome.changed);
            }
        }
        assert_eq!(last, Some(ReservationStatus::Approved));
    }

    #[tokio::test]
    async fn test_dispute_resumes_previous_status() {
        let f = fixture().await;
        pay(&f, "pi_1").await;
        let admin = Actor::user(Uuid::new_v4(), UserRole::Admin);

        let opened = f
            .manager
            .transition(
                f.reservation.id,
                TransitionRequest::new(LifecycleEvent::DisputeOpened, admin),
            )
            .await
            .unwrap();
        assert_eq!(opened.to, ReservationStatus::InDispute);
        assert_eq!(
            opened.reservation.pre_dispute_status,
            Some(ReservationStatus::Paid)
        );

        let resolved = f
            .manager
            .transition(
                f.reservation.id,
                TransitionRequest::new(LifecycleEvent::DisputeResolved, admin),
            )
            .await
            .unwrap();
        assert_eq!(resolved.to, ReservationStatus::Paid);
        assert_eq!(resolved.reservation.pre_dispute_status, None);
    }

    #[tokio::test]
    async fn test_concurrent_cancels_apply_once() {
        let f = fixture().await;
        let admin = Actor::user(Uuid::new_v4(), UserRole::Admin);

        let a = f.manager.transition(
            f.reservation.id,
            TransitionRequest::new(LifecycleEvent::AdminCancel, admin).cancellation("first"),
        );
        let b = f.manager.transition(
            f.reservation.id,
            TransitionRequest::new(LifecycleEvent::AdminCancel, admin).cancellation("second"),
        );
        let (a, b) = tokio::join!(a, b);

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let loser = if a.is_err() { a } else { b };
        assert!(loser.unwrap_err().is_rejection());
    }
}
