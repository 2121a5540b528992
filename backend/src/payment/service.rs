//! Customer-facing payment operations

use std::sync::Arc;
use uuid::Uuid;

use super::gateway::{CheckoutSessionParams, PaymentGateway, PaymentIntentParams};
use crate::error::{ApiError, ApiResult};
use crate::lifecycle::{ensure_can_apply, LifecycleEvent, LifecycleManager, TransitionRequest};
use crate::models::{
    Actor, CheckoutSessionRequest, CheckoutSessionResponse, CheckoutStatusResponse,
    PaymentIntentResponse, PaymentStatus, Reservation, User,
};
use crate::store::{NewPayment, ReservationStore, StoreError};

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn ReservationStore>,
    lifecycle: LifecycleManager,
    gateway: Arc<dyn PaymentGateway>,
    public_app_url: String,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        lifecycle: LifecycleManager,
        gateway: Arc<dyn PaymentGateway>,
        public_app_url: String,
    ) -> Self {
        Self {
            store,
            lifecycle,
            gateway,
            public_app_url: public_app_url.trim_end_matches('/').to_string(),
        }
    }

    async fn owned_reservation(&self, customer: &User, id: Uuid) -> ApiResult<Reservation> {
        let reservation = self
            .store
            .get_reservation(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Reservation {}", id)))?;
        if reservation.customer_id != customer.id {
            return Err(ApiError::Forbidden(
                "Reservation belongs to another customer".to_string(),
            ));
        }
        Ok(reservation)
    }

    /// Hosted checkout for the reservation's total. Return URLs point back at
    /// the caller's origin when known.
    pub async fn create_checkout_session(
        &self,
        customer: &User,
        request: CheckoutSessionRequest,
        origin: Option<String>,
    ) -> ApiResult<CheckoutSessionResponse> {
        let reservation = self
            .owned_reservation(customer, request.reservation_id)
            .await?;
        if reservation.development_id != request.development_id {
            return Err(ApiError::BadRequest(
                "Reservation does not belong to this development".to_string(),
            ));
        }
        ensure_can_apply(reservation.status, &LifecycleEvent::CheckoutStarted)?;

        let development = self
            .store
            .get_development(reservation.development_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Development".to_string()))?;

        let base = origin
            .map(|o| o.trim_end_matches('/').to_string())
            .unwrap_or_else(|| self.public_app_url.clone());
        let params = CheckoutSessionParams {
            reservation_id: reservation.id,
            user_id: customer.id,
            customer_email: customer.email.clone(),
            customer_name: customer.name.clone(),
            product_name: format!(
                "{} ({} - {})",
                development.slug, reservation.start_date, reservation.end_date
            ),
            amount: reservation.total_price,
            currency: reservation.currency.clone(),
            success_url: format!(
                "{}/reservations/{}?payment=success&session_id={{CHECKOUT_SESSION_ID}}",
                base, reservation.id
            ),
            cancel_url: format!("{}/reservations/{}?payment=cancelled", base, reservation.id),
        };

        let session = self.gateway.create_checkout_session(params).await?;

        self.lifecycle
            .transition(
                reservation.id,
                TransitionRequest::new(
                    LifecycleEvent::CheckoutStarted,
                    Actor::user(customer.id, customer.role),
                ),
            )
            .await?;

        Ok(CheckoutSessionResponse {
            session_id: session.id,
            url: session.url,
        })
    }

    /// Embedded payment flow: the intent is recorded as a pending payment and
    /// completed by the gateway's webhook.
    pub async fn create_payment_intent(
        &self,
        customer: &User,
        reservation_id: Uuid,
    ) -> ApiResult<PaymentIntentResponse> {
        let reservation = self.owned_reservation(customer, reservation_id).await?;
        ensure_can_apply(reservation.status, &LifecycleEvent::CheckoutStarted)?;

        let intent = self
            .gateway
            .create_payment_intent(PaymentIntentParams {
                reservation_id,
                user_id: customer.id,
                amount: reservation.total_price,
                currency: reservation.currency.clone(),
            })
            .await?;

        match self
            .store
            .insert_payment(NewPayment {
                reservation_id,
                customer_id: customer.id,
                amount: intent.amount,
                currency: intent.currency.clone(),
                payment_method: None,
                external_payment_id: intent.id.clone(),
                status: PaymentStatus::Pending,
            })
            .await
        {
            Ok(_) => {}
            // Same idempotency key, same intent: the row already exists
            Err(StoreError::Conflict(_)) => {}
            Err(e) => return Err(e.into()),
        }

        self.lifecycle
            .transition(
                reservation_id,
                TransitionRequest::new(
                    LifecycleEvent::CheckoutStarted,
                    Actor::user(customer.id, customer.role),
                )
                .payment_intent(Some(intent.id.clone())),
            )
            .await?;

        Ok(PaymentIntentResponse {
            client_secret: intent.client_secret,
            payment_intent_id: intent.id,
        })
    }

    /// Read-only view of a checkout session. The reservation only changes
    /// through the webhook.
    pub async fn checkout_status(
        &self,
        actor: Actor,
        session_id: &str,
    ) -> ApiResult<CheckoutStatusResponse> {
        let session = self.gateway.retrieve_checkout_session(session_id).await?;
        let reservation_id = session
            .metadata
            .get("reservation_id")
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| ApiError::NotFound("Checkout session".to_string()))?;

        let reservation = self
            .store
            .get_reservation(reservation_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Reservation {}", reservation_id)))?;
        if !actor.owns_or_admin(reservation.customer_id) {
            return Err(ApiError::Forbidden(
                "Checkout session belongs to another customer".to_string(),
            ));
        }

        Ok(CheckoutStatusResponse {
            session_id: session.id,
            status: session.status,
            payment_status: session.payment_status,
            reservation_id,
        })
    }
}
