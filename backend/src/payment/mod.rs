//! Payment gateway integration

mod event;
mod gateway;
mod service;
mod signature;
mod stripe;
mod webhook;

pub use event::{parse_event, GatewayEvent, ParsedEvent};
pub use gateway::{
    CheckoutSession, CheckoutSessionParams, GatewayError, PaymentGateway, PaymentIntent,
    PaymentIntentParams,
};
pub use service::PaymentService;
pub use signature::{compute_signature, signature_header, verify_signature, SignatureError};
pub use stripe::StripeGateway;
pub use webhook::{WebhookAck, WebhookError, WebhookProcessor};
