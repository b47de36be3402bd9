//! Caller identity and credential checks.
//!
//! - [`Auth`]: who made the request, inserted into request extensions by the
//!   auth middleware and carried into WebSocket connections
//! - [`match_api_secret_id`]: constant-time bearer secret lookup
//! - [`webhook_signature`]: verification of signed provider webhooks

pub mod webhook_signature;

use subtle::ConstantTimeEq;

use crate::config::AuthApiSecret;

pub use webhook_signature::{WebhookSignatureError, WebhookVerifier};

/// Authentication context for a request or connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Auth {
    /// Id of the matched API secret; `None` when auth is disabled
    pub id: Option<String>,
    /// WebSocket opened without a token; the first message must authenticate
    pending: bool,
}

impl Auth {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            pending: false,
        }
    }

    /// Context used when authentication is disabled
    pub fn empty() -> Self {
        Self::default()
    }

    /// Context for a WebSocket that will authenticate with its first message
    pub fn pending() -> Self {
        Self {
            id: None,
            pending: true,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

/// Find the id of the API secret equal to `token`.
///
/// Every configured secret is compared so timing does not reveal which
/// entry, if any, matched.
pub fn match_api_secret_id<'a>(token: &str, secrets: &'a [AuthApiSecret]) -> Option<&'a str> {
    let mut matched = None;
    for entry in secrets {
        if bool::from(entry.secret.as_bytes().ct_eq(token.as_bytes())) && matched.is_none() {
            matched = Some(entry.id.as_str());
        }
    }
    matched
}
