//! Per-client token-bucket rate limiting

use axum::{
    body::Body,
    extract::Request,
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, sync::Arc, time::Duration, time::Instant};
use tokio::sync::RwLock;

use super::client_ip;
use crate::error::ApiError;

/// Paths called by the payment processor, which retries on its own schedule
const EXEMPT_PREFIXES: [&str; 2] = ["/api/webhooks/", "/health"];

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(max_tokens: f64) -> Self {
        Self {
            tokens: max_tokens,
            last_update: Instant::now(),
        }
    }

    fn try_consume(&mut self, tokens_per_second: f64, max_tokens: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * tokens_per_second).min(max_tokens);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<RwLock<HashMap<String, TokenBucket>>>,
    tokens_per_second: f64,
    max_tokens: f64,
}

impl RateLimiter {
    /// Bursts up to twice the sustained rate
    pub fn new(requests_per_second: u32) -> Self {
        Self::with_burst(requests_per_second, requests_per_second.saturating_mul(2))
    }

    pub fn with_burst(requests_per_second: u32, burst: u32) -> Self {
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            tokens_per_second: f64::from(requests_per_second),
            max_tokens: f64::from(burst.max(1)),
        }
    }

    pub async fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.write().await;

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.max_tokens));

        bucket.try_consume(self.tokens_per_second, self.max_tokens)
    }

    /// Drops buckets idle for longer than `max_age`
    pub async fn cleanup(&self, max_age: Duration) -> usize {
        let mut buckets = self.buckets.write().await;
        let now = Instant::now();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_update) < max_age);
        before - buckets.len()
    }

    /// Periodic cleanup, spawned once at startup
    pub async fn run_cleanup(self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let dropped = self.cleanup(every).await;
            if dropped > 0 {
                tracing::debug!(dropped, "Rate limiter buckets pruned");
            }
        }
    }
}

fn is_exempt(path: &str) -> bool {
    EXEMPT_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

pub fn rate_limit_layer(
    rate_limiter: RateLimiter,
) -> impl Fn(
    Request<Body>,
    Next,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send>>
       + Clone
       + Send {
    move |request: Request<Body>, next: Next| {
        let rate_limiter = rate_limiter.clone();
        Box::pin(async move {
            if is_exempt(request.uri().path()) {
                return next.run(request).await;
            }

            let client_key = client_ip(request.headers()).unwrap_or_else(|| "unknown".to_string());
            if !rate_limiter.check(&client_key).await {
                tracing::warn!(client = %client_key, path = %request.uri().path(), "Rate limit exceeded");
                let mut response = ApiError::TooManyRequests.into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, header::HeaderValue::from_static("1"));
                return response;
            }

            next.run(request).await
        })
    }
}
