//! HS256 JWT bearer credentials.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::{AuthError, CredentialVerifier, Principal};

/// Claims carried by a realtime bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Verifies HS256-signed tokens and enforces an optional role allow-list.
pub struct JwtVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
    allowed_roles: Vec<String>,
}

impl JwtVerifier {
    pub fn new(secret: &str, allowed_roles: Vec<String>) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            allowed_roles,
        }
    }

    /// Sign a token for `user_id` that expires after `ttl_secs`.
    pub fn issue(&self, user_id: &str, roles: &[&str], ttl_secs: i64) -> Result<String, AuthError> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: chrono::Utc::now().timestamp() + ttl_secs,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| AuthError::InvalidCredential)
    }

    fn role_permitted(&self, roles: &[String]) -> bool {
        self.allowed_roles.is_empty() || roles.iter().any(|r| self.allowed_roles.contains(r))
    }
}

#[async_trait]
impl CredentialVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> Result<Principal, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(credential, &self.decoding, &self.validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "bearer credential rejected");
                AuthError::InvalidCredential
            })?;

        if !self.role_permitted(&data.claims.roles) {
            return Err(AuthError::InsufficientRole);
        }

        Ok(Principal {
            user_id: data.claims.sub,
            roles: data.claims.roles,
        })
    }
}
