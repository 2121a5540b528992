//! Data models for the Temporada backend

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod admin;
pub mod auth;
pub mod booking;
pub mod payment;
pub mod review;

pub use admin::*;
pub use auth::*;
pub use booking::*;
pub use payment::*;
pub use review::*;

/// Postgres enums bound as arrays, as in `status = ANY($1)`
macro_rules! pg_enum_array {
    ($ty:ty, $array:literal) => {
        impl sqlx::postgres::PgHasArrayType for $ty {
            fn array_type_info() -> sqlx::postgres::PgTypeInfo {
                sqlx::postgres::PgTypeInfo::with_name($array)
            }
        }
    };
}

pg_enum_array!(PaymentStatus, "_payment_status");
pg_enum_array!(VoucherStatus, "_voucher_status");
pg_enum_array!(DisputeStatus, "_dispute_status");
pg_enum_array!(FraudStatus, "_fraud_status");

/// User model
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct User {
    pub id: Uuid,
    pub open_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub login_method: Option<String>,
    pub role: UserRole,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_signed_in: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            status: user.status,
            last_signed_in: user.last_signed_in,
        }
    }
}

/// User roles. Customers are stored as `user`.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
    Cotista,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
            UserRole::Cotista => "cotista",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(UserRole::User),
            "admin" => Some(UserRole::Admin),
            "cotista" => Some(UserRole::Cotista),
            _ => None,
        }
    }
}

/// Account status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "user_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Suspended,
    Banned,
}

/// Who caused a state change. Persisted on every audit note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    User { id: Uuid, role: UserRole },
    Gateway,
    System,
}

impl Actor {
    pub fn user(id: Uuid, role: UserRole) -> Self {
        Actor::User { id, role }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Actor::User { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            Actor::User {
                role: UserRole::Admin,
                ..
            }
        )
    }

    /// Short label stored alongside the actor id
    pub fn kind(&self) -> &'static str {
        match self {
            Actor::User { role, .. } => role.as_str(),
            Actor::Gateway => "gateway",
            Actor::System => "system",
        }
    }

    /// True when the actor is the given user or an admin
    pub fn owns_or_admin(&self, owner_id: Uuid) -> bool {
        self.is_admin() || self.user_id() == Some(owner_id)
    }
}

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Pagination parameters
#[derive(Debug, Deserialize, Default)]
pub struct PaginationParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PaginationParams {
    /// Returns `(limit, offset)` clamped to sane bounds
    pub fn limit_offset(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(50).clamp(1, 200);
        let page = self.page.unwrap_or(1).max(1);
        (limit, (page - 1) * limit)
    }
}

/// Paginated response
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}
