//! Authentication service
//!
//! Users sign in through the OAuth server; the backend then issues its own
//! access and refresh tokens and tracks them as sessions.

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AuthSession, AuthTokensResponse, ExternalIdentity, User, UserRole, UserStatus,
};

use super::jwt::{generate_access_token, generate_refresh_token, verify_token, JwtError};

const USER_COLUMNS: &str = "id, open_id, name, email, login_method, role, status, created_at, \
    updated_at, last_signed_in";

const SESSION_COLUMNS: &str = "id, user_id, jti, refresh_token_hash, ip_address, user_agent, \
    expires_at, revoked, revoked_at, created_at, updated_at";

/// Auth service errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Session not found or revoked")]
    SessionNotFound,

    #[error("Token error: {0}")]
    TokenError(String),

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Invalid authorization code")]
    InvalidAuthorizationCode,

    #[error("Identity provider error: {0}")]
    IdentityProvider(String),

    #[error("Account is disabled")]
    AccountDisabled,
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        AuthError::DatabaseError(e.to_string())
    }
}

impl From<JwtError> for AuthError {
    fn from(e: JwtError) -> Self {
        AuthError::TokenError(e.to_string())
    }
}

/// Request metadata stored with a session
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    db_pool: PgPool,
    jwt_secret: String,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_days: i64,
    owner_open_id: Option<String>,
}

impl AuthService {
    pub fn new(
        db_pool: PgPool,
        jwt_secret: String,
        access_token_ttl_seconds: i64,
        refresh_token_ttl_days: i64,
        owner_open_id: Option<String>,
    ) -> Self {
        Self {
            db_pool,
            jwt_secret,
            access_token_ttl_seconds,
            refresh_token_ttl_days,
            owner_open_id,
        }
    }

    /// Creates or refreshes the user behind an OAuth identity. The configured
    /// owner is always an admin.
    pub async fn upsert_user(&self, identity: &ExternalIdentity) -> Result<User, AuthError> {
        let is_owner = self.owner_open_id.as_deref() == Some(identity.open_id.as_str());

        let sql = format!(
            r#"
            INSERT INTO users (id, open_id, name, email, login_method, role, last_signed_in)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (open_id) DO UPDATE
            SET name = COALESCE(EXCLUDED.name, users.name),
                email = COALESCE(EXCLUDED.email, users.email),
                login_method = COALESCE(EXCLUDED.login_method, users.login_method),
                role = CASE WHEN $7 THEN 'admin'::user_role ELSE users.role END,
                last_signed_in = NOW(),
                updated_at = NOW()
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        let user: User = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(&identity.open_id)
            .bind(&identity.name)
            .bind(&identity.email)
            .bind(&identity.login_method)
            .bind(if is_owner { UserRole::Admin } else { UserRole::User })
            .bind(is_owner)
            .fetch_one(&self.db_pool)
            .await?;

        if user.status != UserStatus::Active {
            return Err(AuthError::AccountDisabled);
        }
        Ok(user)
    }

    /// Issues a token pair and records the session
    pub async fn issue_tokens(
        &self,
        user: User,
        client: ClientInfo,
    ) -> Result<AuthTokensResponse, AuthError> {
        let jti = Uuid::new_v4().to_string();
        let access_token =
            generate_access_token(&user, &jti, &self.jwt_secret, self.access_token_ttl_seconds)?;
        let refresh_token = generate_refresh_token(
            &user,
            &Uuid::new_v4().to_string(),
            &self.jwt_secret,
            self.refresh_token_ttl_days,
        )?;
        let session_expires_at = Utc::now() + Duration::days(self.refresh_token_ttl_days);

        sqlx::query(
            r#"
            INSERT INTO auth_sessions (id, user_id, jti, refresh_token_hash, ip_address, user_agent, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(&jti)
        .bind(hash_token(&refresh_token))
        .bind(&client.ip_address)
        .bind(&client.user_agent)
        .bind(session_expires_at)
        .execute(&self.db_pool)
        .await?;

        tracing::info!(user_id = %user.id, "Session issued");

        Ok(AuthTokensResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_ttl_seconds,
            user: user.into(),
        })
    }

    /// Rotates the session's tokens
    pub async fn refresh_tokens(
        &self,
        refresh_token: &str,
    ) -> Result<AuthTokensResponse, AuthError> {
        let claims = verify_token(refresh_token, &self.jwt_secret)
            .map_err(|_| AuthError::InvalidRefreshToken)?;
        if claims.is_access() {
            return Err(AuthError::InvalidRefreshToken);
        }

        let sql = format!(
            "SELECT {} FROM auth_sessions \
             WHERE refresh_token_hash = $1 AND revoked = FALSE AND expires_at > NOW()",
            SESSION_COLUMNS
        );
        let session: AuthSession = sqlx::query_as(&sql)
            .bind(hash_token(refresh_token))
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        let user = self.get_user_by_id(session.user_id).await?;
        if user.status != UserStatus::Active {
            return Err(AuthError::AccountDisabled);
        }

        let jti = Uuid::new_v4().to_string();
        let access_token =
            generate_access_token(&user, &jti, &self.jwt_secret, self.access_token_ttl_seconds)?;
        let new_refresh_token = generate_refresh_token(
            &user,
            &Uuid::new_v4().to_string(),
            &self.jwt_secret,
            self.refresh_token_ttl_days,
        )?;
        let session_expires_at = Utc::now() + Duration::days(self.refresh_token_ttl_days);

        sqlx::query(
            r#"
            UPDATE auth_sessions
            SET jti = $1, refresh_token_hash = $2, expires_at = $3, updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(&jti)
        .bind(hash_token(&new_refresh_token))
        .bind(session_expires_at)
        .bind(session.id)
        .execute(&self.db_pool)
        .await?;

        Ok(AuthTokensResponse {
            access_token,
            refresh_token: new_refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_ttl_seconds,
            user: user.into(),
        })
    }

    /// Revoke a session (logout)
    pub async fn revoke_session(&self, jti: &str) -> Result<(), AuthError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE auth_sessions
            SET revoked = TRUE, revoked_at = NOW(), updated_at = NOW()
            WHERE jti = $1 AND revoked = FALSE
            "#,
        )
        .bind(jti)
        .execute(&self.db_pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(AuthError::SessionNotFound);
        }
        Ok(())
    }

    pub async fn get_user_by_id(&self, user_id: Uuid) -> Result<User, AuthError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    /// Verify a session is valid (not revoked)
    pub async fn verify_session(&self, jti: &str) -> Result<AuthSession, AuthError> {
        let sql = format!(
            "SELECT {} FROM auth_sessions WHERE jti = $1 AND revoked = FALSE AND expires_at > NOW()",
            SESSION_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(jti)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or(AuthError::SessionNotFound)
    }

    /// Get JWT secret (for middleware access)
    pub fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token_is_stable_hex() {
        let a = hash_token("refresh-token");
        assert_eq!(a, hash_token("refresh-token"));
        assert_ne!(a, hash_token("other-token"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
