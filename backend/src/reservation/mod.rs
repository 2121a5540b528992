//! Booking and customer-side reservation operations

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::lifecycle::{ensure_can_apply, LifecycleEvent, LifecycleManager, TransitionRequest};
use crate::models::{
    Actor, AuditEntityType, Cotista, CreateReservationRequest, Dispute, OpenDisputeRequest,
    Reservation, ReservationDetails, UserRole,
};
use crate::store::{NewAuditNote, NewDispute, NewReservation, ReservationStore};

#[derive(Clone)]
pub struct ReservationService {
    store: Arc<dyn ReservationStore>,
    lifecycle: LifecycleManager,
    currency: String,
}

impl ReservationService {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        lifecycle: LifecycleManager,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            lifecycle,
            currency: currency.into(),
        }
    }

    async fn reservation(&self, id: Uuid) -> ApiResult<Reservation> {
        self.store
            .get_reservation(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Reservation {}", id)))
    }

    /// Books a published slot for the requested nights
    pub async fn create_reservation(
        &self,
        customer_id: Uuid,
        request: CreateReservationRequest,
    ) -> ApiResult<Reservation> {
        if request.end_date <= request.start_date {
            return Err(ApiError::BadRequest(
                "End date must be after start date".to_string(),
            ));
        }

        let slot = self
            .store
            .get_availability(request.availability_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Availability".to_string()))?;
        if !slot.is_bookable() {
            return Err(ApiError::Conflict(
                "Availability slot is not available".to_string(),
            ));
        }
        if !slot.covers(request.start_date, request.end_date) {
            return Err(ApiError::BadRequest(
                "Requested dates fall outside the availability window".to_string(),
            ));
        }
        if let Some(cotista) = self.store.get_cotista(slot.cotista_id).await? {
            if cotista.user_id == customer_id {
                return Err(ApiError::BadRequest(
                    "Cotistas cannot book their own availability".to_string(),
                ));
            }
        }

        let nights = (request.end_date - request.start_date).num_days();
        let total_price = slot
            .price_per_night
            .checked_mul(nights)
            .ok_or_else(|| ApiError::BadRequest("Total price is out of range".to_string()))?;

        let reservation = self
            .store
            .create_reservation(NewReservation {
                customer_id,
                availability_id: slot.id,
                start_date: request.start_date,
                end_date: request.end_date,
                total_price,
                currency: self.currency.clone(),
            })
            .await?;

        self.store
            .insert_audit_note(
                NewAuditNote::new(
                    AuditEntityType::Reservation,
                    reservation.id,
                    Actor::user(customer_id, UserRole::User),
                    "reservation_created",
                )
                .with_metadata(json!({
                    "availability_id": slot.id,
                    "nights": nights,
                    "total_price": total_price,
                })),
            )
            .await?;

        tracing::info!(
            reservation_id = %reservation.id,
            customer_id = %customer_id,
            nights,
            total_price,
            "Reservation created"
        );
        Ok(reservation)
    }

    pub async fn my_reservations(&self, customer_id: Uuid) -> ApiResult<Vec<Reservation>> {
        Ok(self.store.list_reservations_by_customer(customer_id).await?)
    }

    /// Reservation with documents, voucher and payments. Visible to the
    /// customer, the reservation's cotista and admins.
    pub async fn reservation_details(
        &self,
        actor: Actor,
        cotista: Option<&Cotista>,
        id: Uuid,
    ) -> ApiResult<ReservationDetails> {
        let reservation = self.reservation(id).await?;
        let is_cotista = cotista.is_some_and(|c| c.id == reservation.cotista_id);
        if !actor.owns_or_admin(reservation.customer_id) && !is_cotista {
            return Err(ApiError::Forbidden(
                "Not allowed to view this reservation".to_string(),
            ));
        }

        let (documents, voucher, payments) = tokio::try_join!(
            self.store.list_documents(id),
            self.store.get_voucher_by_reservation(id),
            self.store.list_payments(id),
        )?;

        Ok(ReservationDetails {
            reservation,
            documents,
            voucher,
            payments,
        })
    }

    /// Opened by the customer or the reservation's cotista
    pub async fn open_dispute(
        &self,
        actor: Actor,
        cotista: Option<&Cotista>,
        reservation_id: Uuid,
        request: OpenDisputeRequest,
    ) -> ApiResult<Dispute> {
        let reporter = actor
            .user_id()
            .ok_or_else(|| ApiError::Forbidden("A user is required".to_string()))?;
        let reservation = self.reservation(reservation_id).await?;

        let is_customer = reservation.customer_id == reporter;
        let cotista = cotista.filter(|c| c.id == reservation.cotista_id);
        let reported_against = match (is_customer, cotista) {
            (true, _) => self
                .store
                .get_cotista(reservation.cotista_id)
                .await?
                .map(|c| c.user_id),
            (false, Some(_)) => Some(reservation.customer_id),
            (false, None) => {
                return Err(ApiError::Forbidden(
                    "Only the reservation's customer or cotista can open a dispute".to_string(),
                ))
            }
        };

        ensure_can_apply(reservation.status, &LifecycleEvent::DisputeOpened)?;

        let dispute = self
            .store
            .insert_dispute(NewDispute {
                reservation_id,
                reported_by: reporter,
                reported_against,
                reason: request.reason.clone(),
                description: request.description,
            })
            .await?;

        self.store
            .insert_audit_note(
                NewAuditNote::new(AuditEntityType::Dispute, dispute.id, actor, "dispute_opened")
                    .with_notes(Some(request.reason.clone()))
                    .with_metadata(json!({ "reservation_id": reservation_id })),
            )
            .await?;

        self.lifecycle
            .transition(
                reservation_id,
                TransitionRequest::new(LifecycleEvent::DisputeOpened, actor).reason(request.reason),
            )
            .await?;

        Ok(dispute)
    }
}
