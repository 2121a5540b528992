//! Authentication extractors
//!
//! Access tiers for handlers: any signed-in user, an optional user, admins,
//! and users that own a cotista profile.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{verify_token, AuthService, JwtError};
use crate::error::ApiError;
use crate::models::{Actor, Cotista, UserRole};
use crate::store::ReservationStore;

/// Authenticated user extracted from JWT token
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: UserRole,
    pub jti: String,
}

impl AuthenticatedUser {
    pub fn actor(&self) -> Actor {
        Actor::user(self.user_id, self.role)
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Extractor for authenticated users
///
/// Verifies the bearer token and checks that its session was not revoked.
///
/// ```rust,ignore
/// async fn my_reservations(user: AuthenticatedUser) -> impl IntoResponse {
///     format!("Hello, user {}", user.user_id)
/// }
/// ```
#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    ApiError::Unauthenticated(
                        "Authorization header with Bearer token required".to_string(),
                    )
                })?;

        let auth_service = Arc::<AuthService>::from_ref(state);

        let claims = verify_token(bearer.token(), auth_service.jwt_secret()).map_err(|e| {
            ApiError::Unauthenticated(match e {
                JwtError::TokenExpired => "Token has expired".to_string(),
                _ => "Invalid token".to_string(),
            })
        })?;

        if !claims.is_access() {
            return Err(ApiError::Unauthenticated(
                "Expected access token".to_string(),
            ));
        }

        let user_id = claims
            .user_id()
            .map_err(|_| ApiError::Unauthenticated("Invalid user ID in token".to_string()))?;
        let role = claims
            .role()
            .map_err(|_| ApiError::Unauthenticated("Invalid role in token".to_string()))?;

        auth_service
            .verify_session(&claims.jti)
            .await
            .map_err(|_| ApiError::Unauthenticated("Session has been revoked".to_string()))?;

        Ok(AuthenticatedUser {
            user_id,
            role,
            jti: claims.jti,
        })
    }
}

/// Authenticates when a token is present, never rejects
#[derive(Debug, Clone)]
pub struct OptionalUser(pub Option<AuthenticatedUser>);

#[async_trait]
impl<S> FromRequestParts<S> for OptionalUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match AuthenticatedUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(OptionalUser(Some(user))),
            Err(_) => Ok(OptionalUser(None)),
        }
    }
}

/// Requires the admin role
pub struct AdminUser(pub AuthenticatedUser);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;

        if !user.is_admin() {
            return Err(ApiError::Forbidden("Admin access required".to_string()));
        }

        Ok(AdminUser(user))
    }
}

/// Requires a cotista profile owned by the caller, whatever its status
pub struct CotistaUser {
    pub user: AuthenticatedUser,
    pub cotista: Cotista,
}

#[async_trait]
impl<S> FromRequestParts<S> for CotistaUser
where
    Arc<AuthService>: FromRef<S>,
    Arc<dyn ReservationStore>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        let store = Arc::<dyn ReservationStore>::from_ref(state);

        let cotista = store
            .get_cotista_by_user(user.user_id)
            .await?
            .ok_or_else(|| ApiError::Forbidden("Cotista access required".to_string()))?;

        Ok(CotistaUser { user, cotista })
    }
}
