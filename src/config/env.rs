use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::{
    AuthApiSecret, DEFAULT_PROVIDER_API_URL, ServerConfig, TlsConfig, parse_auth_api_secrets_json,
};

/// Read an optional variable; empty values count as unset.
pub(super) fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an optional variable, naming it in the error.
pub(super) fn env_parse<T>(key: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid {key} value '{raw}': {e}").into()),
        None => Ok(None),
    }
}

pub(super) fn env_bool(key: &str) -> Result<Option<bool>, Box<dyn std::error::Error>> {
    match env_opt(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(format!("Invalid {key} value '{raw}': expected true or false").into()),
        },
        None => Ok(None),
    }
}

fn tls_from_env() -> Result<Option<TlsConfig>, Box<dyn std::error::Error>> {
    if !env_bool("TLS_ENABLED")?.unwrap_or(false) {
        return Ok(None);
    }
    let cert_path = env_opt("TLS_CERT_PATH")
        .ok_or("TLS_ENABLED is true but TLS_CERT_PATH is not set")?;
    let key_path =
        env_opt("TLS_KEY_PATH").ok_or("TLS_ENABLED is true but TLS_KEY_PATH is not set")?;
    Ok(Some(TlsConfig {
        cert_path: PathBuf::from(cert_path),
        key_path: PathBuf::from(key_path),
    }))
}

/// AUTH_API_SECRETS_JSON wins over the legacy AUTH_API_SECRET/AUTH_API_SECRET_ID pair.
fn auth_secrets_from_env() -> Result<Vec<AuthApiSecret>, Box<dyn std::error::Error>> {
    if let Some(json) = env_opt("AUTH_API_SECRETS_JSON") {
        return parse_auth_api_secrets_json(&json);
    }
    Ok(env_opt("AUTH_API_SECRET")
        .map(|secret| {
            vec![AuthApiSecret {
                id: env_opt("AUTH_API_SECRET_ID").unwrap_or_else(|| "default".to_string()),
                secret,
            }]
        })
        .unwrap_or_default())
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// The `.env` file is loaded in `main` before this runs.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(ServerConfig {
            host: env_opt("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_parse("PORT")?.unwrap_or(3001),
            tls: tls_from_env()?,

            provider_api_url: env_opt("PROVIDER_API_URL")
                .unwrap_or_else(|| DEFAULT_PROVIDER_API_URL.to_string()),
            provider_api_key: env_opt("PROVIDER_API_KEY"),
            provider_api_secret: env_opt("PROVIDER_API_SECRET"),
            provider_application_id: env_opt("PROVIDER_APPLICATION_ID"),
            provider_private_key_path: env_opt("PROVIDER_PRIVATE_KEY_PATH").map(PathBuf::from),
            provider_from_number: env_opt("PROVIDER_FROM_NUMBER"),
            provider_timeout_seconds: env_parse("PROVIDER_TIMEOUT_SECONDS")?.unwrap_or(10),

            public_base_url: env_opt("PUBLIC_BASE_URL"),
            webhook_signature_secret: env_opt("WEBHOOK_SIGNATURE_SECRET"),
            answer_greeting: env_opt("ANSWER_GREETING"),
            webhook_dedup_ttl_seconds: env_parse("WEBHOOK_DEDUP_TTL_SECONDS")?.unwrap_or(600),

            session_retention_seconds: env_parse("SESSION_RETENTION_SECONDS")?.unwrap_or(300),
            pending_grace_seconds: env_parse("PENDING_GRACE_SECONDS")?.unwrap_or(30),
            sweep_interval_ms: env_parse("SWEEP_INTERVAL_MS")?.unwrap_or(5000),
            max_cas_retries: env_parse("MAX_CAS_RETRIES")?.unwrap_or(3),
            fanout_queue_size: env_parse("FANOUT_QUEUE_SIZE")?.unwrap_or(256),

            auth_api_secrets: auth_secrets_from_env()?,
            auth_required: env_bool("AUTH_REQUIRED")?.unwrap_or(false),

            cors_allowed_origins: env_opt("CORS_ALLOWED_ORIGINS"),
            rate_limit_requests_per_second: env_parse("RATE_LIMIT_REQUESTS_PER_SECOND")?
                .unwrap_or(60),
            rate_limit_burst_size: env_parse("RATE_LIMIT_BURST_SIZE")?.unwrap_or(10),
            max_websocket_connections: env_parse("MAX_WEBSOCKET_CONNECTIONS")?,
            max_connections_per_ip: env_parse("MAX_CONNECTIONS_PER_IP")?.unwrap_or(100),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::cleanup_env_vars;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3001);
        assert!(config.tls.is_none());
        assert_eq!(config.provider_api_url, DEFAULT_PROVIDER_API_URL);
        assert_eq!(config.provider_timeout_seconds, 10);
        assert_eq!(config.max_cas_retries, 3);
        assert_eq!(config.fanout_queue_size, 256);
        assert!(!config.auth_required);
        assert!(config.auth_api_secrets.is_empty());
    }

    #[test]
    #[serial]
    fn test_from_env_values() {
        cleanup_env_vars();
        unsafe {
            env::set_var("PORT", "8443");
            env::set_var("PROVIDER_API_KEY", "key");
            env::set_var("PROVIDER_API_SECRET", "secret");
            env::set_var("PENDING_GRACE_SECONDS", "12");
            env::set_var("AUTH_REQUIRED", "yes");
            env::set_var("AUTH_API_SECRET", "legacy-secret");
            env::set_var("MAX_WEBSOCKET_CONNECTIONS", "50");
        }

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.port, 8443);
        assert_eq!(config.provider_api_key.as_deref(), Some("key"));
        assert_eq!(config.pending_grace_seconds, 12);
        assert!(config.auth_required);
        assert_eq!(config.auth_api_secrets[0].id, "default");
        assert_eq!(config.auth_api_secrets[0].secret, "legacy-secret");
        assert_eq!(config.max_websocket_connections, Some(50));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_json_secrets_take_precedence() {
        cleanup_env_vars();
        unsafe {
            env::set_var("AUTH_API_SECRET", "legacy");
            env::set_var("AUTH_API_SECRETS_JSON", r#"[{"id":"crm","secret":"s1"}]"#);
        }

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.auth_api_secrets.len(), 1);
        assert_eq!(config.auth_api_secrets[0].id, "crm");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        cleanup_env_vars();
        unsafe {
            env::set_var("PORT", "not-a-port");
        }

        let err = ServerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("Invalid PORT"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_tls_requires_paths() {
        cleanup_env_vars();
        unsafe {
            env::set_var("TLS_ENABLED", "true");
            env::set_var("TLS_CERT_PATH", "/tmp/cert.pem");
        }

        let err = ServerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("TLS_KEY_PATH"));

        cleanup_env_vars();
    }
}
