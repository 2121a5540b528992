//! Login, session and current-user endpoints

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};

use super::{ok, JsonResult, OptionalUser};
use crate::auth::ClientInfo;
use crate::middleware::client_ip;
use crate::models::{AuthTokensResponse, OAuthCallbackQuery, RefreshTokenRequest, UserResponse};
use crate::state::AppState;

/// The OAuth `state` parameter carries the base64 redirect URI
fn redirect_uri_from_state(state: Option<&str>) -> Option<String> {
    let decoded = STANDARD.decode(state?).ok()?;
    String::from_utf8(decoded).ok()
}

fn client_info(headers: &HeaderMap) -> ClientInfo {
    ClientInfo {
        ip_address: client_ip(headers),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string),
    }
}

/// GET /api/oauth/callback?code=&state=
pub async fn oauth_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<OAuthCallbackQuery>,
) -> JsonResult<AuthTokensResponse> {
    let redirect_uri = redirect_uri_from_state(query.state.as_deref());
    let identity = state
        .identity
        .exchange_code(&query.code, redirect_uri.as_deref())
        .await?;
    let user = state.auth_service.upsert_user(&identity).await?;
    let tokens = state
        .auth_service
        .issue_tokens(user, client_info(&headers))
        .await?;
    ok(tokens)
}

/// GET /auth/me - the signed-in user, or null
pub async fn me(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
) -> JsonResult<Option<UserResponse>> {
    let Some(user) = user else {
        return ok(None);
    };
    let user = state.auth_service.get_user_by_id(user.user_id).await?;
    ok(Some(user.into()))
}

/// POST /auth/logout - always succeeds; revokes the session when there is one
pub async fn logout(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
) -> Json<Value> {
    if let Some(user) = user {
        if let Err(e) = state.auth_service.revoke_session(&user.jti).await {
            tracing::debug!(error = %e, "Logout without an active session");
        }
    }
    Json(json!({ "success": true }))
}

/// POST /auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshTokenRequest>,
) -> JsonResult<AuthTokensResponse> {
    ok(state.auth_service.refresh_tokens(&request.refresh_token).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_uri_from_state() {
        let encoded = STANDARD.encode("https://temporada.example/app");
        assert_eq!(
            redirect_uri_from_state(Some(&encoded)).as_deref(),
            Some("https://temporada.example/app")
        );
        assert_eq!(redirect_uri_from_state(Some("%%%")), None);
        assert_eq!(redirect_uri_from_state(None), None);
    }
}
