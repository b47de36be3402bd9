//! Signed webhook verification.
//!
//! The provider signs each delivery with an HS256 JWT in the `Authorization`
//! header. The token's `payload_hash` claim is the hex SHA-256 of the exact
//! request body, which binds the signature to the payload.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::OffsetDateTime;

/// Oldest `iat` accepted, and how far in the future clocks may drift.
pub const MAX_TOKEN_AGE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookSignatureError {
    #[error("Webhook signature missing")]
    MissingToken,

    #[error("Webhook signature invalid: {0}")]
    InvalidToken(String),

    #[error("Webhook signature issued {age_secs}s from now")]
    Stale { age_secs: i64 },

    #[error("Webhook payload hash does not match body")]
    PayloadMismatch,
}

/// Claims carried by a signed webhook token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookClaims {
    pub iat: i64,
    #[serde(default)]
    pub jti: Option<String>,
    #[serde(default)]
    pub payload_hash: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Hex SHA-256 of a webhook body.
pub fn payload_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Verifies webhook tokens against the shared signature secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier").finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Provider tokens carry iat but no exp; age is checked below
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Check an `Authorization` header value against the body it arrived with.
    pub fn verify(
        &self,
        authorization: Option<&str>,
        body: &[u8],
        now: OffsetDateTime,
    ) -> Result<WebhookClaims, WebhookSignatureError> {
        let token = authorization
            .map(|value| value.strip_prefix("Bearer ").unwrap_or(value).trim())
            .filter(|token| !token.is_empty())
            .ok_or(WebhookSignatureError::MissingToken)?;

        let claims = decode::<WebhookClaims>(token, &self.key, &self.validation)
            .map_err(|e| WebhookSignatureError::InvalidToken(e.to_string()))?
            .claims;

        let age_secs = now.unix_timestamp() - claims.iat;
        if age_secs.abs() > MAX_TOKEN_AGE_SECS {
            return Err(WebhookSignatureError::Stale { age_secs });
        }

        // Bodyless GET deliveries carry no hash
        match claims.payload_hash.as_deref() {
            Some(expected) => {
                let actual = payload_hash(body);
                if !bool::from(expected.to_ascii_lowercase().as_bytes().ct_eq(actual.as_bytes())) {
                    return Err(WebhookSignatureError::PayloadMismatch);
                }
            }
            None if !body.is_empty() => return Err(WebhookSignatureError::PayloadMismatch),
            None => {}
        }

        Ok(claims)
    }
}
