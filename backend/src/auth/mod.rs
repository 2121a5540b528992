//! Authentication for Temporada
//!
//! - OAuth authorization-code login against the hosted identity server
//! - JWT access and refresh tokens
//! - Session tracking so tokens can be revoked

mod jwt;
mod oauth;
mod service;

pub use jwt::{generate_access_token, generate_refresh_token, verify_token, Claims, JwtError};
pub use oauth::{IdentityProvider, OAuthClient};
pub use service::{AuthError, AuthService, ClientInfo};
