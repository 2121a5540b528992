//! Shared fixtures for the integration tests: in-memory store, object store
//! and payment gateway behind a fully wired `AppState`.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use temporada_server::auth::{AuthError, IdentityProvider};
use temporada_server::config::Config;
use temporada_server::models::{
    Actor, CreateReservationRequest, CustomerDocumentUpload, DocumentType, ExternalIdentity,
    FilePayload, Reservation, User, UserRole, UserStatus,
};
use temporada_server::payment::{
    signature_header, CheckoutSession, CheckoutSessionParams, GatewayError, PaymentGateway,
    PaymentIntent, PaymentIntentParams, WebhookAck,
};
use temporada_server::state::AppState;
use temporada_server::storage::MemoryObjectStore;
use temporada_server::store::{MemoryStore, ReservationStore, SeededSlot};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Records every checkout it is asked to create
#[derive(Default)]
pub struct FakeGateway {
    pub checkouts: Mutex<Vec<CheckoutSessionParams>>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        params: CheckoutSessionParams,
    ) -> Result<CheckoutSession, GatewayError> {
        let mut checkouts = self.checkouts.lock().await;
        let id = format!("cs_test_{}", checkouts.len() + 1);
        let mut metadata = HashMap::new();
        metadata.insert("reservation_id".to_string(), params.reservation_id.to_string());
        let session = CheckoutSession {
            url: Some(format!("https://checkout.example/{}", id)),
            id,
            status: Some("open".to_string()),
            payment_status: Some("unpaid".to_string()),
            payment_intent: None,
            amount_total: Some(params.amount),
            currency: Some(params.currency.clone()),
            metadata,
        };
        checkouts.push(params);
        Ok(session)
    }

    async fn create_payment_intent(
        &self,
        params: PaymentIntentParams,
    ) -> Result<PaymentIntent, GatewayError> {
        Ok(PaymentIntent {
            id: format!("pi_{}", params.reservation_id.simple()),
            client_secret: Some("pi_secret".to_string()),
            status: "requires_payment_method".to_string(),
            amount: params.amount,
            currency: params.currency,
        })
    }

    async fn retrieve_checkout_session(&self, _id: &str) -> Result<CheckoutSession, GatewayError> {
        Err(GatewayError::Rejected {
            status: 404,
            message: "No such checkout session".to_string(),
        })
    }

    async fn retrieve_payment_intent(&self, _id: &str) -> Result<PaymentIntent, GatewayError> {
        Err(GatewayError::Rejected {
            status: 404,
            message: "No such payment intent".to_string(),
        })
    }
}

/// Refuses every code
pub struct NoIdentity;

#[async_trait]
impl IdentityProvider for NoIdentity {
    async fn exchange_code(
        &self,
        _code: &str,
        _redirect_uri: Option<&str>,
    ) -> Result<ExternalIdentity, AuthError> {
        Err(AuthError::InvalidAuthorizationCode)
    }
}

pub struct Harness {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub objects: Arc<MemoryObjectStore>,
    pub gateway: Arc<FakeGateway>,
}

/// The pool is lazy and never connected: everything exercised here goes
/// through the in-memory store.
pub fn harness() -> Harness {
    let config = Config::for_tests();
    let pool = PgPoolOptions::new()
        .connect_lazy(&config.database_url)
        .expect("lazy pool");
    let store = Arc::new(MemoryStore::new());
    let objects = Arc::new(MemoryObjectStore::new());
    let gateway = Arc::new(FakeGateway::default());

    let state = AppState::build(
        config,
        pool,
        store.clone(),
        gateway.clone(),
        objects.clone(),
        Arc::new(NoIdentity),
    );

    Harness {
        state,
        store,
        objects,
        gateway,
    }
}

pub fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, month, day).unwrap()
}

pub fn user(role: UserRole) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        open_id: format!("open-{}", Uuid::new_v4()),
        name: Some("Test User".to_string()),
        email: Some("guest@example.com".to_string()),
        login_method: Some("email".to_string()),
        role,
        status: UserStatus::Active,
        created_at: now,
        updated_at: now,
        last_signed_in: now,
    }
}

pub fn admin() -> Actor {
    Actor::user(Uuid::new_v4(), UserRole::Admin)
}

/// A booking for July 1-8 at 5 000 per night
pub struct Booking {
    pub customer: User,
    pub cotista_user_id: Uuid,
    pub seeded: SeededSlot,
    pub reservation: Reservation,
}

pub async fn book(h: &Harness) -> Booking {
    let customer = user(UserRole::User);
    let cotista_user_id = Uuid::new_v4();
    let seeded = h
        .store
        .seed_bookable_slot(cotista_user_id, date(7, 1), date(7, 8), 5_000)
        .await;
    let reservation = h
        .state
        .reservations
        .create_reservation(
            customer.id,
            CreateReservationRequest {
                availability_id: seeded.slot.id,
                start_date: date(7, 1),
                end_date: date(7, 8),
            },
        )
        .await
        .unwrap();
    Booking {
        customer,
        cotista_user_id,
        seeded,
        reservation,
    }
}

pub fn checkout_completed(event_id: &str, reservation_id: Uuid, amount: i64) -> Value {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": format!("cs_{}", event_id),
            "payment_intent": format!("pi_{}", event_id),
            "amount_total": amount,
            "currency": "usd",
            "payment_status": "paid",
            "metadata": { "reservation_id": reservation_id.to_string() }
        }}
    })
}

/// Body and a valid signature header for `event`
pub fn signed(event: &Value) -> (Vec<u8>, String) {
    let body = event.to_string().into_bytes();
    let header = signature_header(&body, Utc::now().timestamp(), WEBHOOK_SECRET);
    (body, header)
}

pub async fn deliver(h: &Harness, event: &Value) -> WebhookAck {
    let (body, header) = signed(event);
    h.state.webhooks.handle(&body, Some(&header)).await.unwrap()
}

/// Books and pays through the webhook
pub async fn paid_booking(h: &Harness) -> Booking {
    let booking = book(h).await;
    let event = checkout_completed(
        &format!("evt_{}", Uuid::new_v4().simple()),
        booking.reservation.id,
        booking.reservation.total_price,
    );
    assert_eq!(deliver(h, &event).await, WebhookAck::Received);
    booking
}

pub fn file(content_type: &str, name: &str, bytes: &[u8]) -> FilePayload {
    FilePayload {
        file_data: STANDARD.encode(bytes),
        file_name: name.to_string(),
        content_type: content_type.to_string(),
    }
}

pub fn pdf() -> FilePayload {
    file("application/pdf", "document.pdf", b"%PDF-1.4 test")
}

pub fn customer_upload(reservation_id: Uuid, document_type: DocumentType) -> CustomerDocumentUpload {
    CustomerDocumentUpload {
        reservation_id,
        document_type,
        file: pdf(),
    }
}

pub async fn status_of(h: &Harness, reservation_id: Uuid) -> temporada_server::lifecycle::ReservationStatus {
    h.store
        .get_reservation(reservation_id)
        .await
        .unwrap()
        .unwrap()
        .status
}
