//! Reservation, availability and cotista records

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::lifecycle::ReservationStatus;

/// A customer's booking of one availability slot
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reservation {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub development_id: Uuid,
    pub cotista_id: Uuid,
    pub availability_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Minor currency units
    pub total_price: i64,
    pub currency: String,
    pub status: ReservationStatus,
    /// Status to resume once an open dispute is resolved
    pub pre_dispute_status: Option<ReservationStatus>,
    pub payment_intent_id: Option<String>,
    pub cancellation_reason: Option<String>,
    pub refund_amount: Option<i64>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn nights(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }
}

/// Cotista approval status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "cotista_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CotistaStatus {
    Registered,
    UnderReview,
    Approved,
    Rejected,
    Suspended,
}

/// Fractional owner profile
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Cotista {
    pub id: Uuid,
    pub user_id: Uuid,
    pub development_id: Uuid,
    pub status: CotistaStatus,
    pub personal_data: Option<serde_json::Value>,
    pub ownership_proof: Option<String>,
    pub bank_details: Option<serde_json::Value>,
    pub address_proof: Option<String>,
    pub identity_documents: Option<serde_json::Value>,
    pub terms_accepted: bool,
    pub terms_accepted_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A published date range with a nightly price, joined with its owner's status
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AvailabilitySlot {
    pub id: Uuid,
    pub cotista_id: Uuid,
    pub development_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub price_per_night: i64,
    pub is_published: bool,
    pub is_booked: bool,
    pub cotista_status: CotistaStatus,
}

impl AvailabilitySlot {
    /// Visible to customers: published, unbooked, owned by an approved cotista
    pub fn is_bookable(&self) -> bool {
        self.is_published && !self.is_booked && self.cotista_status == CotistaStatus::Approved
    }

    pub fn covers(&self, start: NaiveDate, end: NaiveDate) -> bool {
        start >= self.start_date && end <= self.end_date && end > start
    }
}

/// Minimal development data the booking flow needs
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DevelopmentSummary {
    pub id: Uuid,
    pub slug: String,
    pub name_key: String,
    pub city_id: Uuid,
    pub is_active: bool,
}

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// POST /api/reservations
#[derive(Debug, Deserialize, Validate)]
pub struct CreateReservationRequest {
    pub availability_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// POST /api/reservations/:id/disputes
#[derive(Debug, Deserialize, Validate)]
pub struct OpenDisputeRequest {
    #[validate(length(min = 3, max = 255))]
    pub reason: String,
    #[validate(length(min = 10, max = 5000))]
    pub description: String,
}

/// Reservation with every dependent record, for its owner or an admin
#[derive(Debug, Serialize)]
pub struct ReservationDetails {
    pub reservation: Reservation,
    pub documents: Vec<super::Document>,
    pub voucher: Option<super::Voucher>,
    pub payments: Vec<super::Payment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot() -> AvailabilitySlot {
        AvailabilitySlot {
            id: Uuid::new_v4(),
            cotista_id: Uuid::new_v4(),
            development_id: Uuid::new_v4(),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 1, 20).unwrap(),
            price_per_night: 5000,
            is_published: true,
            is_booked: false,
            cotista_status: CotistaStatus::Approved,
        }
    }

    #[test]
    fn test_slot_bookable_requires_approved_cotista() {
        let mut s = slot();
        assert!(s.is_bookable());
        s.cotista_status = CotistaStatus::UnderReview;
        assert!(!s.is_bookable());
    }

    #[test]
    fn test_slot_covers_date_range() {
        let s = slot();
        let d = |day| NaiveDate::from_ymd_opt(2026, 1, day).unwrap();
        assert!(s.covers(d(10), d(20)));
        assert!(s.covers(d(12), d(14)));
        assert!(!s.covers(d(9), d(14)));
        assert!(!s.covers(d(14), d(14)));
        assert!(!s.covers(d(15), d(21)));
    }
}
