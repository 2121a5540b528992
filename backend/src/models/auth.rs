//! Authentication models for Temporada

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{UserRole, UserStatus};

/// Authentication session for JWT tracking
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct AuthSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub jti: String,
    pub refresh_token_hash: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Identity returned by the OAuth provider
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalIdentity {
    #[serde(alias = "openId", alias = "sub")]
    pub open_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(alias = "loginMethod", alias = "platform")]
    pub login_method: Option<String>,
}

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Query string of the OAuth redirect
#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: String,
    pub state: Option<String>,
}

/// Auth tokens response
#[derive(Debug, Serialize)]
pub struct AuthTokensResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserResponse,
}

/// User response (sanitized for API)
#[derive(Debug, Serialize, Clone)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: UserRole,
    pub status: UserStatus,
    pub last_signed_in: DateTime<Utc>,
}

/// Refresh token request
#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}
