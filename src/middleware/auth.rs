use crate::auth::{Auth, match_api_secret_id};
use crate::errors::auth_error::AuthError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Extract the bearer token from a request
///
/// Sources, in order:
/// 1. `Authorization: Bearer <token>` (preferred)
/// 2. `?token=<token>` query parameter, for browser WebSocket clients that
///    cannot set headers
fn extract_token(request: &Request) -> Result<String, AuthError> {
    if let Some(auth_header) = request.headers().get("authorization") {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        if let Some(token) = auth_str.strip_prefix("Bearer ") {
            tracing::debug!("Token extracted from Authorization header");
            return Ok(token.to_string());
        }
        return Err(AuthError::InvalidAuthHeader);
    }

    if let Some(query) = request.uri().query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == "token" {
                tracing::debug!("Token extracted from query parameter");
                return Ok(value.to_string());
            }
        }
    }

    Err(AuthError::MissingAuthHeader)
}

/// Authentication middleware that validates bearer tokens against the
/// configured API secrets.
///
/// On success an [`Auth`] carrying the secret id is inserted into the request
/// extensions. A `/ws` upgrade without any token is let through with
/// [`Auth::pending`]; the socket then has to authenticate with its first
/// message.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    if !state.config.auth_required {
        tracing::debug!("Authentication disabled, inserting empty Auth context");
        request.extensions_mut().insert(Auth::empty());
        return Ok(next.run(request).await);
    }

    let request_method = request.method().to_string();
    let request_path = request.uri().path().to_string();

    let token = match extract_token(&request) {
        Ok(t) => t,
        Err(AuthError::MissingAuthHeader) if request_path == "/ws" => {
            tracing::info!(
                path = %request_path,
                "WebSocket connection without token, enabling first-message auth"
            );
            request.extensions_mut().insert(Auth::pending());
            return Ok(next.run(request).await);
        }
        Err(e) => return Err(e),
    };

    if !state.config.has_api_secret_auth() {
        return Err(AuthError::ConfigError(
            "Authentication required but no API secrets configured".to_string(),
        ));
    }

    match match_api_secret_id(&token, &state.config.auth_api_secrets) {
        Some(secret_id) => {
            tracing::debug!(
                method = %request_method,
                path = %request_path,
                auth_id = %secret_id,
                "API secret authentication successful"
            );
            request.extensions_mut().insert(Auth::new(secret_id));
            Ok(next.run(request).await)
        }
        None => {
            tracing::warn!(
                method = %request_method,
                path = %request_path,
                "API secret authentication failed: token mismatch"
            );
            Err(AuthError::Unauthorized("Invalid API secret".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(uri: &str, authorization: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header("authorization", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_extract_token_sources() {
        assert_eq!(
            extract_token(&request("/calls", Some("Bearer abc"))).unwrap(),
            "abc"
        );
        assert_eq!(
            extract_token(&request("/ws?token=xyz", None)).unwrap(),
            "xyz"
        );
        assert_eq!(
            extract_token(&request("/calls", Some("Basic abc"))).unwrap_err(),
            AuthError::InvalidAuthHeader
        );
        assert_eq!(
            extract_token(&request("/calls", None)).unwrap_err(),
            AuthError::MissingAuthHeader
        );
    }

    #[test]
    fn test_header_wins_over_query() {
        assert_eq!(
            extract_token(&request("/ws?token=query", Some("Bearer header"))).unwrap(),
            "header"
        );
    }
}
