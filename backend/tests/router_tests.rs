//! HTTP-level behaviour of the assembled router. Only paths that never reach
//! Postgres are exercised here.

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;
use temporada_server::middleware::RateLimiter;
use temporada_server::routes::build_router;

fn app(h: &Harness) -> Router {
    build_router(h.state.clone(), RateLimiter::new(1000))
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_protected_routes_require_a_bearer_token() {
    let h = harness();

    for (method, uri) in [
        ("GET", "/api/reservations"),
        ("POST", "/api/payment/checkout-session"),
        ("GET", "/api/cotista/dashboard"),
        ("GET", "/api/admin/dashboard"),
    ] {
        let response = app(&h)
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{} {}", method, uri);
    }
}

#[tokio::test]
async fn test_malformed_token_is_unauthenticated() {
    let h = harness();
    let response = app(&h)
        .oneshot(
            Request::builder()
                .uri("/api/reservations")
                .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert!(body["error"]["code"].is_string());
}

#[tokio::test]
async fn test_me_without_session_returns_null() {
    let h = harness();
    let response = app(&h)
        .oneshot(Request::builder().uri("/auth/me").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], json!(true));
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn test_logout_without_session_succeeds() {
    let h = harness();
    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/logout")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "success": true }));
}

#[tokio::test]
async fn test_webhook_with_bad_signature_is_rejected() {
    let h = harness();
    let booking = book(&h).await;
    let event = checkout_completed("evt_forged", booking.reservation.id, 35_000);

    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/stripe")
                .header("stripe-signature", "t=1700000000,v1=deadbeef")
                .body(Body::from(event.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/stripe")
                .body(Body::from(event.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(h.store.webhook_result("evt_forged").await.is_none());
}

#[tokio::test]
async fn test_signed_webhook_is_acknowledged_over_http() {
    let h = harness();
    let booking = book(&h).await;
    let event = checkout_completed("evt_http", booking.reservation.id, 35_000);
    let (body, signature) = signed(&event);

    let send = |body: Vec<u8>, signature: String| {
        app(&h).oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/stripe")
                .header("stripe-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
    };

    let first = send(body.clone(), signature.clone()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(json_body(first).await, json!({ "received": true }));

    let second = send(body, signature).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(
        json_body(second).await,
        json!({ "received": true, "duplicate": true })
    );
}

#[tokio::test]
async fn test_responses_carry_security_headers_and_request_id() {
    let h = harness();
    let response = app(&h)
        .oneshot(
            Request::builder()
                .uri("/")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["x-request-id"], "req-123");
    assert!(headers.get(header::STRICT_TRANSPORT_SECURITY).is_none());
}

#[tokio::test]
async fn test_rate_limit_applies_per_client() {
    let h = harness();
    let app = build_router(h.state.clone(), RateLimiter::with_burst(1, 1));
    let request = |ip: &str| {
        Request::builder()
            .uri("/")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    };

    let first = app.clone().oneshot(request("203.0.113.7")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.clone().oneshot(request("203.0.113.7")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.headers()[header::RETRY_AFTER], "1");

    let other = app.oneshot(request("198.51.100.2")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}
