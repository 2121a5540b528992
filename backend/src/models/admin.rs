//! Disputes, fraud flags and audit notes

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "dispute_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    UnderReview,
    Resolved,
    Closed,
    Escalated,
}

impl DisputeStatus {
    pub const ACTIVE: [DisputeStatus; 3] = [
        DisputeStatus::Open,
        DisputeStatus::UnderReview,
        DisputeStatus::Escalated,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Dispute {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub reported_by: Uuid,
    pub reported_against: Option<Uuid>,
    pub reason: String,
    pub description: String,
    pub status: DisputeStatus,
    pub resolution: Option<String>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[sqlx(type_name = "fraud_severity", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FraudSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "fraud_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FraudStatus {
    Open,
    Investigating,
    Resolved,
    FalsePositive,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FraudFlag {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub reservation_id: Option<Uuid>,
    pub flag_type: String,
    pub severity: FraudSeverity,
    pub description: String,
    pub status: FraudStatus,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "audit_entity_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AuditEntityType {
    User,
    Cotista,
    Reservation,
    Document,
    Voucher,
    Dispute,
}

/// Append-only record of who changed what
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditNote {
    pub id: Uuid,
    pub entity_type: AuditEntityType,
    pub entity_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub actor_kind: String,
    pub action: String,
    pub notes: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// How an admin closes a dispute
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    /// Reservation resumes where it was when the dispute opened
    Resume,
    Cancel,
    Refund,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResolveDisputeRequest {
    pub outcome: DisputeOutcome,
    #[validate(length(min = 3, max = 5000))]
    pub resolution: String,
    #[validate(range(min = 0))]
    pub refund_amount: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateFraudFlagRequest {
    pub user_id: Option<Uuid>,
    pub reservation_id: Option<Uuid>,
    #[validate(length(min = 1, max = 100))]
    pub flag_type: String,
    pub severity: FraudSeverity,
    #[validate(length(min = 1, max = 5000))]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFraudFlagRequest {
    pub status: FraudStatus,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CancelReservationRequest {
    #[validate(length(min = 3, max = 2000))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefundReservationRequest {
    #[validate(range(min = 0))]
    pub amount: Option<i64>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuditTrailQuery {
    pub entity_type: AuditEntityType,
    pub entity_id: Uuid,
}

#[derive(Debug, Serialize, Default, PartialEq, Eq)]
pub struct AdminDashboard {
    pub pending_documents: i64,
    pub pending_cotistas: i64,
    pub pending_vouchers: i64,
    pub open_disputes: i64,
    pub active_fraud_flags: i64,
    pub reservations_by_status: Vec<StatusCount>,
}

#[derive(Debug, Serialize, sqlx::FromRow, PartialEq, Eq)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}
