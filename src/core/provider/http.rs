//! REST client for the voice provider's call-control API.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::{
    ConferenceOp, PlaceCallRequest, PlacedCall, ProviderError, ProviderResult, SpeakRequest,
    TransferTarget, VoiceProvider,
};

// =============================================================================
// Constants
// =============================================================================

/// User-Agent header value for API requests.
pub const USER_AGENT: &str = concat!("voice-call-gateway/", env!("CARGO_PKG_VERSION"));

/// Default connect timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Lifetime of an application token.
const APPLICATION_TOKEN_TTL_SECS: i64 = 900;

// =============================================================================
// Credentials
// =============================================================================

/// How requests to the provider are authenticated.
#[derive(Clone)]
pub enum ProviderCredentials {
    /// Short-lived RS256 token signed with the application's private key
    ApplicationJwt {
        application_id: String,
        key: Arc<EncodingKey>,
    },
    /// Account key and secret
    Basic { api_key: String, api_secret: String },
    /// No credentials, for local mocks
    Anonymous,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderCredentials::ApplicationJwt { application_id, .. } => f
                .debug_struct("ApplicationJwt")
                .field("application_id", application_id)
                .finish_non_exhaustive(),
            ProviderCredentials::Basic { api_key, .. } => f
                .debug_struct("Basic")
                .field("api_key", api_key)
                .finish_non_exhaustive(),
            ProviderCredentials::Anonymous => f.write_str("Anonymous"),
        }
    }
}

#[derive(Serialize)]
struct ApplicationClaims<'a> {
    application_id: &'a str,
    iat: i64,
    exp: i64,
    jti: String,
}

impl ProviderCredentials {
    /// Application credentials from a PEM-encoded RSA private key.
    pub fn application(application_id: impl Into<String>, private_key_pem: &[u8]) -> ProviderResult<Self> {
        let key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| ProviderError::new("configuration", format!("Invalid RSA key: {e}")))?;
        Ok(ProviderCredentials::ApplicationJwt {
            application_id: application_id.into(),
            key: Arc::new(key),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> ProviderResult<reqwest::RequestBuilder> {
        match self {
            ProviderCredentials::ApplicationJwt {
                application_id,
                key,
            } => {
                let now = OffsetDateTime::now_utc().unix_timestamp();
                let claims = ApplicationClaims {
                    application_id,
                    iat: now,
                    exp: now + APPLICATION_TOKEN_TTL_SECS,
                    jti: uuid::Uuid::new_v4().to_string(),
                };
                let token = encode(&Header::new(Algorithm::RS256), &claims, key).map_err(|e| {
                    ProviderError::new("configuration", format!("Failed to sign token: {e}"))
                })?;
                Ok(request.bearer_auth(token))
            }
            ProviderCredentials::Basic {
                api_key,
                api_secret,
            } => Ok(request.basic_auth(api_key, Some(api_secret))),
            ProviderCredentials::Anonymous => Ok(request),
        }
    }
}

// =============================================================================
// Error bodies
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorBody {
    code: Option<Value>,
    #[serde(rename = "type")]
    error_type: Option<String>,
    title: Option<String>,
    detail: Option<String>,
    error_text: Option<String>,
}

fn error_from_body(status: reqwest::StatusCode, text: &str) -> ProviderError {
    let body: ErrorBody = serde_json::from_str(text).unwrap_or_default();

    let code = body
        .code
        .map(|c| match c {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .or_else(|| {
            body.error_type.map(|t| {
                // Problem-details types are URLs; the fragment or last segment is the code
                let code = t.rsplit(['#', '/']).next().unwrap_or_default().to_string();
                if code.is_empty() { t } else { code }
            })
        })
        .unwrap_or_else(|| status.as_u16().to_string());

    let message = body
        .detail
        .or(body.title)
        .or(body.error_text)
        .or_else(|| (!text.trim().is_empty()).then(|| text.trim().to_string()))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

    ProviderError::new(code, message)
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    let code = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else {
        "transport"
    };
    ProviderError::new(code, err.to_string())
}

// =============================================================================
// Client
// =============================================================================

/// [`VoiceProvider`] backed by the provider's REST API.
#[derive(Debug, Clone)]
pub struct HttpVoiceProvider {
    client: Client,
    base_url: String,
    credentials: ProviderCredentials,
}

impl HttpVoiceProvider {
    pub fn new(
        base_url: impl Into<String>,
        credentials: ProviderCredentials,
        request_timeout: Duration,
    ) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                ProviderError::new("configuration", format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    async fn send(&self, method: Method, path: &str, body: &Value) -> ProviderResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "Provider request");

        let request = self
            .credentials
            .authorize(self.client.request(method.clone(), &url).json(body))?;
        let response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let err = error_from_body(status, &text);
        warn!(%method, %url, status = status.as_u16(), code = %err.code, "Provider rejected request");
        Err(err)
    }

    async fn call_action(&self, call_id: &str, body: Value) -> ProviderResult<()> {
        self.send(Method::PUT, &format!("/v1/calls/{call_id}"), &body)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl VoiceProvider for HttpVoiceProvider {
    async fn place_call(&self, request: &PlaceCallRequest) -> ProviderResult<PlacedCall> {
        let mut body = json!({
            "to": [{"type": "phone", "number": request.to}],
            "from": {"type": "phone", "number": request.from},
        });
        if let Some(url) = &request.answer_url {
            body["answer_url"] = json!([url]);
        }
        if let Some(url) = &request.event_url {
            body["event_url"] = json!([url]);
        }

        let response = self.send(Method::POST, "/v1/calls", &body).await?;
        response
            .json::<PlacedCall>()
            .await
            .map_err(|e| ProviderError::new("invalid_response", e.to_string()))
    }

    async fn answer(&self, call_id: &str) -> ProviderResult<()> {
        self.call_action(call_id, json!({"action": "answer"})).await
    }

    async fn hangup(&self, call_id: &str) -> ProviderResult<()> {
        self.call_action(call_id, json!({"action": "hangup"})).await
    }

    async fn transfer(&self, call_id: &str, target: &TransferTarget) -> ProviderResult<()> {
        let destination = match target {
            TransferTarget::Url { url } => json!({"type": "ncco", "url": [url]}),
            TransferTarget::Phone { number } => json!({
                "type": "ncco",
                "ncco": [{"action": "connect", "endpoint": [{"type": "phone", "number": number}]}],
            }),
        };
        self.call_action(
            call_id,
            json!({"action": "transfer", "destination": destination}),
        )
        .await
    }

    async fn send_digits(&self, call_id: &str, digits: &str) -> ProviderResult<()> {
        self.send(
            Method::PUT,
            &format!("/v1/calls/{call_id}/dtmf"),
            &json!({"digits": digits}),
        )
        .await
        .map(|_| ())
    }

    async fn start_recording(&self, call_id: &str) -> ProviderResult<()> {
        self.send(
            Method::PUT,
            &format!("/v1/calls/{call_id}/record"),
            &json!({"action": "start"}),
        )
        .await
        .map(|_| ())
    }

    async fn stop_recording(&self, call_id: &str) -> ProviderResult<()> {
        self.send(
            Method::PUT,
            &format!("/v1/calls/{call_id}/record"),
            &json!({"action": "stop"}),
        )
        .await
        .map(|_| ())
    }

    async fn speak(&self, call_id: &str, request: &SpeakRequest) -> ProviderResult<()> {
        let body = serde_json::to_value(request)
            .map_err(|e| ProviderError::new("invalid_request", e.to_string()))?;
        self.send(Method::PUT, &format!("/v1/calls/{call_id}/talk"), &body)
            .await
            .map(|_| ())
    }

    async fn conference_op(
        &self,
        conference_id: &str,
        call_id: &str,
        op: ConferenceOp,
    ) -> ProviderResult<()> {
        self.send(
            Method::PUT,
            &format!("/v1/conferences/{conference_id}/participants/{call_id}"),
            &json!({"action": op.as_str()}),
        )
        .await
        .map(|_| ())
    }
}
