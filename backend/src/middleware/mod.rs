//! Middleware for the Temporada API
//!
//! Request tracing, rate limiting, security headers and the authentication
//! extractors.

use axum::http::HeaderMap;

pub mod auth;
mod rate_limiter;
mod security;
mod tracing;

pub use auth::{AdminUser, AuthenticatedUser, CotistaUser, OptionalUser};
pub use rate_limiter::{rate_limit_layer, RateLimiter};
pub use security::security_headers;
pub use self::tracing::{request_tracing, REQUEST_ID};

/// Caller address as reported by the proxy in front of the API
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim().to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "10.0.0.9".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("10.0.0.9"));

        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));

        assert_eq!(client_ip(&HeaderMap::new()), None);
    }
}
