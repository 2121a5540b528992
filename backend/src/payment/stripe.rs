//! Stripe REST client

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use super::gateway::{
    CheckoutSession, CheckoutSessionParams, GatewayError, PaymentGateway, PaymentIntent,
    PaymentIntentParams,
};
use crate::config::Config;

const CHECKOUT_DESCRIPTION: &str = "Vacation rental reservation";

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

pub struct StripeGateway {
    client: Client,
    api_base: String,
    secret_key: Option<String>,
}

impl StripeGateway {
    pub fn new(api_base: impl Into<String>, secret_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.stripe_api_base.clone(), config.stripe_secret_key.clone())
    }

    fn secret(&self) -> Result<&str, GatewayError> {
        self.secret_key.as_deref().ok_or(GatewayError::NotConfigured)
    }

    fn backoff() -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(300))
            .with_max_delay(Duration::from_secs(3))
            .with_max_times(3)
            .with_jitter()
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| GatewayError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<StripeErrorBody>(&body)
            .ok()
            .and_then(|b| b.error.message)
            .unwrap_or(body);
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(GatewayError::Transient(format!("{}: {}", status, message)))
        } else {
            Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }

    fn transport_error(err: reqwest::Error) -> GatewayError {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            GatewayError::Transient(err.to_string())
        } else {
            GatewayError::Decode(err.to_string())
        }
    }

    /// Form-encoded POST. The idempotency key makes retries safe.
    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
        idempotency_key: &str,
    ) -> Result<T, GatewayError> {
        let secret = self.secret()?;
        let url = format!("{}{}", self.api_base, path);

        (|| async {
            let response = self
                .client
                .post(&url)
                .bearer_auth(secret)
                .header("Idempotency-Key", idempotency_key)
                .form(form)
                .send()
                .await
                .map_err(Self::transport_error)?;
            Self::decode(response).await
        })
        .retry(Self::backoff())
        .when(GatewayError::is_transient)
        .notify(|err, delay| {
            tracing::warn!(error = %err, retry_in_ms = %delay.as_millis(), path, "Stripe request failed, retrying");
        })
        .await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let secret = self.secret()?;
        let url = format!("{}{}", self.api_base, path);

        (|| async {
            let response = self
                .client
                .get(&url)
                .bearer_auth(secret)
                .send()
                .await
                .map_err(Self::transport_error)?;
            Self::decode(response).await
        })
        .retry(Self::backoff())
        .when(GatewayError::is_transient)
        .await
    }
}

fn field(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

/// Form fields for a one-item checkout carrying the reservation metadata
pub fn checkout_form(params: &CheckoutSessionParams) -> Vec<(String, String)> {
    let mut form = vec![
        field("mode", "payment"),
        field("success_url", &params.success_url),
        field("cancel_url", &params.cancel_url),
        field("client_reference_id", params.user_id),
        field("allow_promotion_codes", "true"),
        field("line_items[0][quantity]", 1),
        field("line_items[0][price_data][currency]", &params.currency),
        field("line_items[0][price_data][unit_amount]", params.amount),
        field("line_items[0][price_data][product_data][name]", &params.product_name),
        field(
            "line_items[0][price_data][product_data][description]",
            CHECKOUT_DESCRIPTION,
        ),
        field("metadata[reservation_id]", params.reservation_id),
        field("metadata[user_id]", params.user_id),
        field("payment_intent_data[metadata][reservation_id]", params.reservation_id),
        field("payment_intent_data[metadata][user_id]", params.user_id),
    ];
    if let Some(email) = &params.customer_email {
        form.push(field("customer_email", email));
    }
    if let Some(name) = &params.customer_name {
        form.push(field("metadata[customer_name]", name));
    }
    form
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout_session(
        &self,
        params: CheckoutSessionParams,
    ) -> Result<CheckoutSession, GatewayError> {
        let form = checkout_form(&params);
        let key = format!("checkout-{}-{}", params.reservation_id, params.amount);
        let session: CheckoutSession = self
            .post_form("/v1/checkout/sessions", &form, &key)
            .await?;
        tracing::info!(
            session_id = %session.id,
            reservation_id = %params.reservation_id,
            "Checkout session created"
        );
        Ok(session)
    }

    async fn create_payment_intent(
        &self,
        params: PaymentIntentParams,
    ) -> Result<PaymentIntent, GatewayError> {
        let form = vec![
            field("amount", params.amount),
            field("currency", &params.currency),
            field("automatic_payment_methods[enabled]", "true"),
            field("metadata[reservation_id]", params.reservation_id),
            field("metadata[user_id]", params.user_id),
        ];
        let key = format!("intent-{}-{}", params.reservation_id, params.amount);
        self.post_form("/v1/payment_intents", &form, &key).await
    }

    async fn retrieve_checkout_session(&self, id: &str) -> Result<CheckoutSession, GatewayError> {
        self.get(&format!("/v1/checkout/sessions/{}", id)).await
    }

    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError> {
        self.get(&format!("/v1/payment_intents/{}", id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn params() -> CheckoutSessionParams {
        CheckoutSessionParams {
            reservation_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            customer_email: Some("guest@example.com".to_string()),
            customer_name: None,
            product_name: "Ocean View Suites".to_string(),
            amount: 35_000,
            currency: "usd".to_string(),
            success_url: "https://app/success".to_string(),
            cancel_url: "https://app/cancel".to_string(),
        }
    }

    #[test]
    fn test_checkout_form_carries_reservation_metadata() {
        let p = params();
        let form = checkout_form(&p);
        let get = |k: &str| {
            form.iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("mode").as_deref(), Some("payment"));
        assert_eq!(get("line_items[0][price_data][unit_amount]").as_deref(), Some("35000"));
        assert_eq!(get("metadata[reservation_id]"), Some(p.reservation_id.to_string()));
        assert_eq!(get("client_reference_id"), Some(p.user_id.to_string()));
        assert_eq!(get("customer_email").as_deref(), Some("guest@example.com"));
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let gateway = StripeGateway::new("https://api.stripe.com", None);
        let err = gateway.retrieve_payment_intent("pi_1").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotConfigured));
    }
}
