//! Inbound gateway webhooks
//!
//! Every delivery is verified, then claimed by event id so a redelivered
//! event is acknowledged without being applied twice. Events that fail on
//! our side are recorded as errors and answered with a 5xx, which makes the
//! gateway retry them later.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::event::{parse_event, CompletedCheckout, GatewayEvent, IntentUpdate, ParsedEvent};
use super::signature::{verify_signature, SignatureError};
use crate::lifecycle::{LifecycleError, LifecycleEvent, LifecycleManager, TransitionRequest};
use crate::models::{Actor, PaymentStatus};
use crate::store::{NewPayment, ReservationStore, StoreError, WebhookProcessingResult};

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Missing webhook signature")]
    MissingSignature,

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    #[error("Malformed webhook payload: {0}")]
    Malformed(String),

    #[error("Webhook processing failed: {0}")]
    Processing(String),
}

impl From<StoreError> for WebhookError {
    fn from(err: StoreError) -> Self {
        WebhookError::Processing(err.to_string())
    }
}

/// How a delivery was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAck {
    /// Dashboard test event, verified only
    Verified,
    Received,
    /// Already processed or in flight elsewhere
    Duplicate,
}

#[derive(Clone)]
pub struct WebhookProcessor {
    store: Arc<dyn ReservationStore>,
    lifecycle: LifecycleManager,
    secret: Option<String>,
    tolerance_seconds: i64,
}

impl WebhookProcessor {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        lifecycle: LifecycleManager,
        secret: Option<String>,
        tolerance_seconds: i64,
    ) -> Self {
        Self {
            store,
            lifecycle,
            secret,
            tolerance_seconds,
        }
    }

    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck, WebhookError> {
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| WebhookError::Processing("webhook secret is not configured".into()))?;
        let signature = signature.ok_or(WebhookError::MissingSignature)?;
        verify_signature(
            payload,
            signature,
            secret,
            self.tolerance_seconds,
            Utc::now().timestamp(),
        )?;

        let parsed = parse_event(payload).map_err(|e| WebhookError::Malformed(e.to_string()))?;

        if parsed.is_test_event() {
            tracing::info!(event_id = %parsed.id, event_type = %parsed.event_type, "Test webhook verified");
            return Ok(WebhookAck::Verified);
        }

        if !self
            .store
            .claim_webhook_event(&parsed.id, &parsed.event_type)
            .await?
        {
            tracing::info!(event_id = %parsed.id, "Duplicate webhook delivery ignored");
            return Ok(WebhookAck::Duplicate);
        }

        match self.dispatch(&parsed).await {
            Ok(()) => {
                self.store
                    .finish_webhook_event(&parsed.id, WebhookProcessingResult::Success, None)
                    .await?;
                tracing::info!(event_id = %parsed.id, event_type = %parsed.event_type, "Webhook processed");
                Ok(WebhookAck::Received)
            }
            Err(e) => {
                tracing::error!(event_id = %parsed.id, error = %e, "Webhook processing failed");
                if let Err(finish) = self
                    .store
                    .finish_webhook_event(
                        &parsed.id,
                        WebhookProcessingResult::Error,
                        Some(e.to_string()),
                    )
                    .await
                {
                    tracing::error!(event_id = %parsed.id, error = %finish, "Failed to record webhook error");
                }
                Err(e)
            }
        }
    }

    async fn dispatch(&self, parsed: &ParsedEvent) -> Result<(), WebhookError> {
        match &parsed.event {
            GatewayEvent::CheckoutSessionCompleted(session) => {
                self.on_checkout_completed(session).await
            }
            GatewayEvent::PaymentIntentSucceeded(intent) => self.on_intent_succeeded(intent).await,
            GatewayEvent::PaymentIntentFailed(intent) => self.on_intent_failed(intent).await,
            GatewayEvent::Unknown { event_type } => {
                tracing::debug!(event_type = %event_type, "Unhandled webhook event type");
                Ok(())
            }
        }
    }

    async fn on_checkout_completed(&self, session: &CompletedCheckout) -> Result<(), WebhookError> {
        let Some(reservation_id) = metadata_reservation(&session.metadata) else {
            tracing::warn!(session_id = %session.id, "Checkout session without reservation metadata");
            return Ok(());
        };
        let Some(reservation) = self.store.get_reservation(reservation_id).await? else {
            tracing::warn!(session_id = %session.id, reservation_id = %reservation_id, "Checkout for unknown reservation");
            return Ok(());
        };
        if session.payment_status.as_deref() != Some("paid") {
            tracing::info!(
                session_id = %session.id,
                reservation_id = %reservation_id,
                payment_status = session.payment_status.as_deref().unwrap_or("missing"),
                "Checkout completed before payment settled, waiting for the gateway"
            );
            return Ok(());
        }

        let external_id = session
            .payment_intent
            .clone()
            .unwrap_or_else(|| session.id.clone());
        let write = self
            .store
            .upsert_completed_payment(NewPayment {
                reservation_id,
                customer_id: reservation.customer_id,
                amount: session.amount_total.unwrap_or(reservation.total_price),
                currency: session
                    .currency
                    .clone()
                    .unwrap_or_else(|| reservation.currency.clone()),
                payment_method: Some("card".to_string()),
                external_payment_id: external_id.clone(),
                status: PaymentStatus::Completed,
            })
            .await?;
        if !write.changed {
            tracing::debug!(external_id = %external_id, "Payment already recorded as completed");
        }

        let request = TransitionRequest::new(
            LifecycleEvent::PaymentSucceeded {
                external_payment_id: external_id,
            },
            Actor::Gateway,
        )
        .payment_intent(session.payment_intent.clone());
        self.apply(reservation_id, request).await
    }

    async fn on_intent_succeeded(&self, intent: &IntentUpdate) -> Result<(), WebhookError> {
        let payment = match self
            .store
            .transition_payment(
                &intent.id,
                &[PaymentStatus::Pending, PaymentStatus::Processing],
                PaymentStatus::Completed,
                None,
            )
            .await?
        {
            Some(payment) => Some(payment),
            None => self.store.find_payment_by_external_id(&intent.id).await?,
        };

        let reservation_id = match payment {
            Some(p) if p.status == PaymentStatus::Completed => p.reservation_id,
            Some(p) => {
                tracing::warn!(payment_id = %p.id, status = ?p.status, "Intent succeeded for a payment in an unexpected state");
                return Ok(());
            }
            None => {
                // Intent created outside this service: record it from metadata.
                let Some(reservation_id) = metadata_reservation(&intent.metadata) else {
                    tracing::debug!(intent_id = %intent.id, "Succeeded intent without reservation metadata");
                    return Ok(());
                };
                let Some(reservation) = self.store.get_reservation(reservation_id).await? else {
                    return Ok(());
                };
                self.store
                    .upsert_completed_payment(NewPayment {
                        reservation_id,
                        customer_id: reservation.customer_id,
                        amount: intent.amount.unwrap_or(reservation.total_price),
                        currency: intent
                            .currency
                            .clone()
                            .unwrap_or_else(|| reservation.currency.clone()),
                        payment_method: Some("card".to_string()),
                        external_payment_id: intent.id.clone(),
                        status: PaymentStatus::Completed,
                    })
                    .await?;
                reservation_id
            }
        };

        let request = TransitionRequest::new(
            LifecycleEvent::PaymentSucceeded {
                external_payment_id: intent.id.clone(),
            },
            Actor::Gateway,
        )
        .payment_intent(Some(intent.id.clone()));
        self.apply(reservation_id, request).await
    }

    async fn on_intent_failed(&self, intent: &IntentUpdate) -> Result<(), WebhookError> {
        let reason = intent
            .last_payment_error
            .as_ref()
            .and_then(|e| e.message.clone());

        let reservation_id = match self
            .store
            .transition_payment(
                &intent.id,
                &[PaymentStatus::Pending, PaymentStatus::Processing],
                PaymentStatus::Failed,
                reason.clone(),
            )
            .await?
        {
            Some(payment) => Some(payment.reservation_id),
            None => metadata_reservation(&intent.metadata),
        };

        let Some(reservation_id) = reservation_id else {
            tracing::debug!(intent_id = %intent.id, "Failed intent not linked to a reservation");
            return Ok(());
        };

        let mut request = TransitionRequest::new(
            LifecycleEvent::PaymentFailed {
                external_payment_id: intent.id.clone(),
            },
            Actor::Gateway,
        );
        if let Some(reason) = reason {
            request = request.reason(reason);
        }
        self.apply(reservation_id, request).await
    }

    /// Lifecycle refusals are acknowledged; only infrastructure failures
    /// make the gateway retry.
    async fn apply(
        &self,
        reservation_id: Uuid,
        request: TransitionRequest,
    ) -> Result<(), WebhookError> {
        let event = request.event.name();
        match self.lifecycle.transition(reservation_id, request).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_rejection() => {
                tracing::warn!(reservation_id = %reservation_id, event, error = %e, "Webhook event not applicable");
                Ok(())
            }
            Err(LifecycleError::NotFound(_)) => {
                tracing::warn!(reservation_id = %reservation_id, event, "Webhook for unknown reservation");
                Ok(())
            }
            Err(e) => Err(WebhookError::Processing(e.to_string())),
        }
    }
}

fn metadata_reservation(metadata: &std::collections::HashMap<String, String>) -> Option<Uuid> {
    metadata
        .get("reservation_id")
        .and_then(|id| Uuid::parse_str(id).ok())
}
