use std::collections::HashSet;

use super::{AuthApiSecret, ServerConfig};
use crate::utils::validation::validate_http_url;

/// Every API secret needs a non-empty, unique id and a non-empty secret.
pub fn validate_auth_api_secrets(
    secrets: &[AuthApiSecret],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut seen = HashSet::new();
    for entry in secrets {
        if entry.id.trim().is_empty() {
            return Err("API secret entries must have a non-empty id".into());
        }
        if entry.secret.trim().is_empty() {
            return Err(format!("API secret '{}' is empty", entry.id).into());
        }
        if !seen.insert(entry.id.as_str()) {
            return Err(format!("Duplicate API secret id '{}'", entry.id).into());
        }
    }
    Ok(())
}

pub fn validate_auth_required(
    auth_required: bool,
    secrets: &[AuthApiSecret],
) -> Result<(), Box<dyn std::error::Error>> {
    if auth_required && secrets.is_empty() {
        return Err(
            "AUTH_REQUIRED is true but no API secrets are configured (AUTH_API_SECRETS_JSON or AUTH_API_SECRET)"
                .into(),
        );
    }
    Ok(())
}

/// Application id and private key travel together; a lone key or secret is a mistake.
pub fn validate_provider_credentials(
    config: &ServerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    validate_http_url(&config.provider_api_url)
        .map_err(|e| format!("Invalid PROVIDER_API_URL: {e}"))?;

    match (
        &config.provider_application_id,
        &config.provider_private_key_path,
    ) {
        (Some(_), None) => {
            return Err(
                "PROVIDER_APPLICATION_ID is set but PROVIDER_PRIVATE_KEY_PATH is missing".into(),
            );
        }
        (None, Some(_)) => {
            return Err(
                "PROVIDER_PRIVATE_KEY_PATH is set but PROVIDER_APPLICATION_ID is missing".into(),
            );
        }
        (Some(_), Some(path)) if !path.exists() => {
            return Err(format!("Provider private key not found: {}", path.display()).into());
        }
        _ => {}
    }

    if config.provider_api_key.is_some() != config.provider_api_secret.is_some() {
        return Err("PROVIDER_API_KEY and PROVIDER_API_SECRET must be set together".into());
    }

    if config.provider_timeout_seconds == 0 {
        return Err("PROVIDER_TIMEOUT_SECONDS must be greater than zero".into());
    }
    Ok(())
}

pub fn validate_public_base_url(url: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(url) = url {
        validate_http_url(url).map_err(|e| format!("Invalid PUBLIC_BASE_URL: {e}"))?;
    }
    Ok(())
}

pub fn validate_session_timing(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.pending_grace_seconds == 0 {
        return Err("PENDING_GRACE_SECONDS must be greater than zero".into());
    }
    if config.sweep_interval_ms == 0 {
        return Err("SWEEP_INTERVAL_MS must be greater than zero".into());
    }
    if config.max_cas_retries == 0 {
        return Err("MAX_CAS_RETRIES must be at least 1".into());
    }
    if config.fanout_queue_size == 0 {
        return Err("FANOUT_QUEUE_SIZE must be at least 1".into());
    }
    Ok(())
}
