//! Bearer token validation.
//!
//! Tokens are HS256 JWTs; the user identity comes from a configurable claim
//! (`username` by default). Handlers receive it through the
//! [`AuthenticatedUser`] extractor.

use crate::config::AuthConfig;
use crate::error::PostError;
use crate::model::Principal;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Validates bearer tokens against the configured signing secret
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    username_claim: String,
}

impl JwtVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // `exp` is checked when present but not required
        validation.required_spec_claims = HashSet::new();

        Self {
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            username_claim: config.username_claim.clone(),
        }
    }

    /// Validate `token` and return the principal it names
    pub fn verify(&self, token: &str) -> Result<Principal, PostError> {
        let token_data = decode::<Map<String, Value>>(token, &self.decoding_key, &self.validation)
            .map_err(|e| PostError::Unauthenticated(format!("invalid token: {}", e)))?;

        let user = token_data
            .claims
            .get(&self.username_claim)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PostError::Unauthenticated(format!("token has no {} claim", self.username_claim))
            })?;

        Principal::new(user)
    }

    /// Validate the value of an `Authorization` header
    pub fn verify_header(&self, header: &str) -> Result<Principal, PostError> {
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                PostError::Unauthenticated("authorization must use Bearer scheme".to_string())
            })?;

        self.verify(token)
    }
}

/// Principal of an authenticated request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<JwtVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = PostError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = Arc::<JwtVerifier>::from_ref(state);

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| PostError::Unauthenticated("missing Authorization header".to_string()))?
            .to_str()
            .map_err(|_| PostError::Unauthenticated("invalid Authorization header".to_string()))?;

        let principal = verifier.verify_header(header)?;
        debug!(user = %principal.as_str(), "Authenticated request");

        Ok(Self(principal))
    }
}

#[cfg(test)]
pub(crate) fn sign_test_token(secret: &str, claims: &Value) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
