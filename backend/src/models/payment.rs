//! Payment ledger entries

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
}

/// One attempt to pay a reservation. A reservation may carry several.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub customer_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub payment_method: Option<String>,
    /// Gateway transaction id (payment intent, or session when no intent exists)
    pub external_payment_id: Option<String>,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CheckoutSessionRequest {
    pub reservation_id: Uuid,
    pub development_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CheckoutSessionResponse {
    pub session_id: String,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentIntentRequest {
    pub reservation_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct PaymentIntentResponse {
    pub client_secret: Option<String>,
    pub payment_intent_id: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutStatusResponse {
    pub session_id: String,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub reservation_id: Uuid,
}
