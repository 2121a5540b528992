//! Payment gateway abstraction

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Payment gateway unreachable: {0}")]
    Transient(String),

    #[error("Payment gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected payment gateway response: {0}")]
    Decode(String),

    #[error("Payment gateway is not configured")]
    NotConfigured,
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutSessionParams {
    pub reservation_id: Uuid,
    pub user_id: Uuid,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub product_name: String,
    /// Minor currency units
    pub amount: i64,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone)]
pub struct PaymentIntentParams {
    pub reservation_id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub payment_intent: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: String,
    pub amount: i64,
    pub currency: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        params: CheckoutSessionParams,
    ) -> Result<CheckoutSession, GatewayError>;

    async fn create_payment_intent(
        &self,
        params: PaymentIntentParams,
    ) -> Result<PaymentIntent, GatewayError>;

    async fn retrieve_checkout_session(&self, id: &str) -> Result<CheckoutSession, GatewayError>;

    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError>;
}
