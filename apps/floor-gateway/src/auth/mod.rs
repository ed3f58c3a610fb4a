//! Credential verification boundary for the realtime handshake.

pub mod tokens;

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use thiserror::Error;

pub use tokens::{Claims, JwtVerifier};

/// Identity established by a verified credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid credential")]
    InvalidCredential,
    #[error("insufficient role")]
    InsufficientRole,
}

/// Verifies a bearer credential presented during the handshake.
///
/// Backed by JWT verification in production; tests may substitute their own.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<Principal, AuthError>;
}

/// Extract the bearer credential from the `Authorization` header, falling
/// back to the `token` query parameter (browsers cannot set headers on a
/// WebSocket upgrade).
pub fn bearer_credential(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    from_header
        .or(query_token.map(str::trim).filter(|t| !t.is_empty()))
        .map(str::to_string)
}
