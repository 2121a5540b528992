//! Gateway webhook event payloads

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletedCheckout {
    pub id: String,
    pub payment_intent: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LastPaymentError {
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntentUpdate {
    pub id: String,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub last_payment_error: Option<LastPaymentError>,
}

/// The webhook events the platform acts on
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Also raised when a delayed payment method settles after checkout
    CheckoutSessionCompleted(CompletedCheckout),
    PaymentIntentSucceeded(IntentUpdate),
    PaymentIntentFailed(IntentUpdate),
    Unknown { event_type: String },
}

#[derive(Debug, Clone)]
pub struct ParsedEvent {
    pub id: String,
    pub event_type: String,
    pub event: GatewayEvent,
}

impl ParsedEvent {
    /// Test events sent from the gateway dashboard are acknowledged only
    pub fn is_test_event(&self) -> bool {
        self.id.starts_with("evt_test_")
    }
}

pub fn parse_event(payload: &[u8]) -> Result<ParsedEvent, serde_json::Error> {
    let raw: RawEvent = serde_json::from_slice(payload)?;
    let event = match raw.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            GatewayEvent::CheckoutSessionCompleted(serde_json::from_value(raw.data.object)?)
        }
        "payment_intent.succeeded" => {
            GatewayEvent::PaymentIntentSucceeded(serde_json::from_value(raw.data.object)?)
        }
        "payment_intent.payment_failed" => {
            GatewayEvent::PaymentIntentFailed(serde_json::from_value(raw.data.object)?)
        }
        other => GatewayEvent::Unknown {
            event_type: other.to_string(),
        },
    };
    Ok(ParsedEvent {
        id: raw.id,
        event_type: raw.event_type,
        event,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_checkout_completed() {
        let payload = json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_1",
                "payment_intent": "pi_1",
                "amount_total": 35000,
                "currency": "usd",
                "metadata": { "reservation_id": "abc" }
            }}
        });
        let parsed = parse_event(payload.to_string().as_bytes()).unwrap();
        match parsed.event {
            GatewayEvent::CheckoutSessionCompleted(c) => {
                assert_eq!(c.payment_intent.as_deref(), Some("pi_1"));
                assert_eq!(c.amount_total, Some(35000));
                assert_eq!(c.metadata.get("reservation_id").map(String::as_str), Some("abc"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unknown_types_are_kept() {
        let payload = json!({"id": "evt_test_9", "type": "customer.created", "data": {"object": {}}});
        let parsed = parse_event(payload.to_string().as_bytes()).unwrap();
        assert!(parsed.is_test_event());
        assert!(matches!(parsed.event, GatewayEvent::Unknown { .. }));
    }

    #[test]
    fn test_failed_intent_carries_error_message() {
        let payload = json!({
            "id": "evt_2",
            "type": "payment_intent.payment_failed",
            "data": { "object": {
                "id": "pi_2",
                "last_payment_error": { "message": "Your card was declined." }
            }}
        });
        let parsed = parse_event(payload.to_string().as_bytes()).unwrap();
        let GatewayEvent::PaymentIntentFailed(intent) = parsed.event else {
            panic!("expected a failed intent");
        };
        assert_eq!(
            intent.last_payment_error.and_then(|e| e.message).as_deref(),
            Some("Your card was declined.")
        );
    }
}
