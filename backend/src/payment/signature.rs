//! Webhook signature verification
//!
//! The gateway signs `"{timestamp}.{payload}"` with HMAC-SHA256 and sends
//! `t=<timestamp>,v1=<hex>[,v1=<hex>...]`. Any matching `v1` is accepted,
//! which lets the secret be rotated without dropping events.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is malformed")]
    MalformedHeader,

    #[error("signature timestamp is outside the tolerance window")]
    TimestampOutOfTolerance,

    #[error("no signature matches the payload")]
    Mismatch,
}

fn signed_mac(payload: &[u8], timestamp: i64, secret: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(mac)
}

pub fn compute_signature(payload: &[u8], timestamp: i64, secret: &str) -> String {
    signed_mac(payload, timestamp, secret)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

/// Builds a header as the gateway would send it
pub fn signature_header(payload: &[u8], timestamp: i64, secret: &str) -> String {
    format!("t={},v1={}", timestamp, compute_signature(payload, timestamp, secret))
}

/// Returns the signed timestamp when the header is valid for `payload`
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_seconds: i64,
    now: i64,
) -> Result<i64, SignatureError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    if candidates.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }
    let within_tolerance = now
        .checked_sub(timestamp)
        .is_some_and(|age| age.unsigned_abs() <= tolerance_seconds.max(0).unsigned_abs());
    if !within_tolerance {
        return Err(SignatureError::TimestampOutOfTolerance);
    }

    let matched = candidates.into_iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        signed_mac(payload, timestamp, secret)
            .is_some_and(|mac| mac.verify_slice(&expected).is_ok())
    });

    if matched {
        Ok(timestamp)
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_760_000_000;

    #[test]
    fn test_valid_signature() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = signature_header(payload, NOW, SECRET);
        assert_eq!(verify_signature(payload, &header, SECRET, 300, NOW), Ok(NOW));
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let header = signature_header(b"original", NOW, SECRET);
        assert_eq!(
            verify_signature(b"tampered", &header, SECRET, 300, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let header = signature_header(b"x", NOW - 301, SECRET);
        assert_eq!(
            verify_signature(b"x", &header, SECRET, 300, NOW),
            Err(SignatureError::TimestampOutOfTolerance)
        );
    }

    #[test]
    fn test_any_v1_may_match() {
        let good = compute_signature(b"x", NOW, SECRET);
        let header = format!("t={},v1={},v1={}", NOW, "00".repeat(32), good);
        assert!(verify_signature(b"x", &header, SECRET, 300, NOW).is_ok());
    }

    #[test]
    fn test_malformed_headers() {
        for header in ["", "v1=abc", "t=abc,v1=00", "t=1"] {
            assert_eq!(
                verify_signature(b"x", header, SECRET, i64::MAX, NOW),
                Err(SignatureError::MalformedHeader),
                "{}",
                header
            );
        }

        for header in [
            "t=-9223372036854775808,v1=00",
            "t=9223372036854775807,v1=00",
        ] {
            assert_eq!(
                verify_signature(b"x", header, SECRET, 300, NOW),
                Err(SignatureError::TimestampOutOfTolerance),
                "{}",
                header
            );
        }
    }
}
