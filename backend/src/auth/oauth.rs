//! OAuth authorization-code exchange

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::AuthError;
use crate::config::Config;
use crate::models::ExternalIdentity;

/// Resolves an authorization code into the signed-in identity
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<ExternalIdentity, AuthError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    client_id: &'a str,
    grant_type: &'static str,
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect_uri: Option<&'a str>,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(alias = "accessToken")]
    access_token: String,
}

/// Client for the hosted OAuth server
pub struct OAuthClient {
    client: Client,
    server_url: Option<String>,
    app_id: Option<String>,
}

impl OAuthClient {
    pub fn new(server_url: Option<String>, app_id: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            client,
            server_url: server_url.map(|u| u.trim_end_matches('/').to_string()),
            app_id,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.oauth_server_url.clone(), config.oauth_app_id.clone())
    }

    fn endpoint(&self) -> Result<(&str, &str), AuthError> {
        match (&self.server_url, &self.app_id) {
            (Some(url), Some(app)) => Ok((url, app)),
            _ => Err(AuthError::IdentityProvider(
                "OAuth server is not configured".to_string(),
            )),
        }
    }
}

fn exchange_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(200))
        .with_max_times(2)
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

#[async_trait]
impl IdentityProvider for OAuthClient {
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<ExternalIdentity, AuthError> {
        let (base, app_id) = self.endpoint()?;

        let token_url = format!("{}/v1/oauth/token", base);
        let body = TokenRequest {
            client_id: app_id,
            grant_type: "authorization_code",
            code,
            redirect_uri,
        };
        let response = (|| async { self.client.post(&token_url).json(&body).send().await })
            .retry(exchange_backoff())
            .when(is_retryable)
            .await
            .map_err(|e| AuthError::IdentityProvider(e.to_string()))?;

        if response.status().is_client_error() {
            return Err(AuthError::InvalidAuthorizationCode);
        }
        if !response.status().is_success() {
            return Err(AuthError::IdentityProvider(format!(
                "token exchange failed with {}",
                response.status()
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::IdentityProvider(e.to_string()))?;

        let userinfo_url = format!("{}/v1/oauth/userinfo", base);
        let response = (|| async {
            self.client
                .get(&userinfo_url)
                .bearer_auth(&token.access_token)
                .send()
                .await
        })
        .retry(exchange_backoff())
        .when(is_retryable)
        .await
        .map_err(|e| AuthError::IdentityProvider(e.to_string()))?
        .error_for_status()
        .map_err(|e| AuthError::IdentityProvider(e.to_string()))?;

        let identity: ExternalIdentity = response
            .json()
            .await
            .map_err(|e| AuthError::IdentityProvider(e.to_string()))?;
        if identity.open_id.is_empty() {
            return Err(AuthError::IdentityProvider(
                "identity without an open id".to_string(),
            ));
        }

        tracing::debug!(open_id = %identity.open_id, "OAuth code exchanged");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_client_fails_fast() {
        let client = OAuthClient::new(None, Some("app".to_string()));
        assert!(matches!(
            client.exchange_code("code", None).await,
            Err(AuthError::IdentityProvider(_))
        ));
    }

    #[test]
    fn test_identity_accepts_provider_field_names() {
        let identity: ExternalIdentity = serde_json::from_str(
            r#"{"openId":"u-42","name":"Ana","email":"ana@example.com","loginMethod":"email"}"#,
        )
        .unwrap();
        assert_eq!(identity.open_id, "u-42");
        assert_eq!(identity.login_method.as_deref(), Some("email"));
    }
}
