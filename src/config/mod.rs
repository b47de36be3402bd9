//! Configuration module for the voice call gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use voice_call_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod validation;
pub mod yaml;

pub use yaml::YamlConfig;

/// Default provider REST endpoint
pub const DEFAULT_PROVIDER_API_URL: &str = "https://api.nexmo.com";

/// TLS configuration for HTTPS support
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to the certificate chain (PEM)
    pub cert_path: PathBuf,
    /// Path to the private key (PEM)
    pub key_path: PathBuf,
}

/// Bearer secret accepted by the API, tagged with an id for logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthApiSecret {
    pub id: String,
    pub secret: String,
}

/// Server configuration
///
/// Loaded from environment variables and optional YAML, then validated.
/// Secrets are zeroized on drop, so build instances with full struct literals.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    /// TLS configuration (None = plain HTTP)
    pub tls: Option<TlsConfig>,

    // Voice provider
    /// Base URL of the provider REST API
    pub provider_api_url: String,
    pub provider_api_key: Option<String>,
    pub provider_api_secret: Option<String>,
    /// Application id; with a private key, requests use an RS256 application token
    pub provider_application_id: Option<String>,
    pub provider_private_key_path: Option<PathBuf>,
    /// Caller id used when `POST /calls` does not name one
    pub provider_from_number: Option<String>,
    /// Time allowed for one provider request
    /// Default: 10
    pub provider_timeout_seconds: u64,

    // Webhooks
    /// Externally reachable base URL; used to build answer/event URLs for outbound calls
    pub public_base_url: Option<String>,
    /// HS256 secret used to verify signed webhooks (None = unsigned webhooks accepted)
    pub webhook_signature_secret: Option<String>,
    /// Text spoken to inbound callers from the answer webhook
    pub answer_greeting: Option<String>,
    /// How long a delivery key is remembered for deduplication
    /// Default: 600
    pub webhook_dedup_ttl_seconds: u64,

    // Sessions
    /// How long a terminal session stays readable before eviction
    /// Default: 300
    pub session_retention_seconds: u64,
    /// Age at which an unconfirmed pending action fails the call
    /// Default: 30
    pub pending_grace_seconds: u64,
    /// Interval between reconciliation sweeps
    /// Default: 5000
    pub sweep_interval_ms: u64,
    /// Attempts a webhook write makes on compare-and-swap conflicts
    /// Default: 3
    pub max_cas_retries: usize,
    /// Per-subscriber realtime queue length
    /// Default: 256
    pub fanout_queue_size: usize,

    // Authentication
    pub auth_api_secrets: Vec<AuthApiSecret>,
    pub auth_required: bool,

    // Security settings
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (no cross-origin requests)
    pub cors_allowed_origins: Option<String>,
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

/// Zeroize secret fields when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.provider_api_key {
            key.zeroize();
        }
        if let Some(ref mut secret) = self.provider_api_secret {
            secret.zeroize();
        }
        if let Some(ref mut secret) = self.webhook_signature_secret {
            secret.zeroize();
        }
        for secret in &mut self.auth_api_secrets {
            secret.secret.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values (loaded in `main`)
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if the YAML file cannot be read or is malformed, an
    /// environment variable has an invalid format, or validation fails.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    /// Run every validation rule against the final configuration.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_auth_api_secrets(&self.auth_api_secrets)?;
        validation::validate_auth_required(self.auth_required, &self.auth_api_secrets)?;
        validation::validate_provider_credentials(self)?;
        validation::validate_public_base_url(self.public_base_url.as_deref())?;
        validation::validate_session_timing(self)?;
        Ok(())
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Check if API secret authentication is configured
    pub fn has_api_secret_auth(&self) -> bool {
        !self.auth_api_secrets.is_empty()
    }

    /// Check if inbound webhooks must carry a signature
    pub fn has_webhook_signature(&self) -> bool {
        self.webhook_signature_secret.is_some()
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    pub fn webhook_dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.webhook_dedup_ttl_seconds)
    }

    pub fn session_retention(&self) -> Duration {
        Duration::from_secs(self.session_retention_seconds)
    }

    pub fn pending_grace(&self) -> Duration {
        Duration::from_secs(self.pending_grace_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// URL the provider fetches call control from, when a public base URL is set
    pub fn answer_url(&self) -> Option<String> {
        self.webhook_url("answer")
    }

    /// URL the provider posts status events to, when a public base URL is set
    pub fn event_url(&self) -> Option<String> {
        self.webhook_url("event")
    }

    fn webhook_url(&self, name: &str) -> Option<String> {
        self.public_base_url
            .as_deref()
            .map(|base| format!("{}/webhooks/{name}", base.trim_end_matches('/')))
    }
}

pub(crate) fn parse_auth_api_secrets_json(
    json_str: &str,
) -> Result<Vec<AuthApiSecret>, Box<dyn std::error::Error>> {
    #[derive(serde::Deserialize)]
    struct AuthApiSecretJson {
        id: String,
        secret: String,
    }

    let secrets: Vec<AuthApiSecretJson> = serde_json::from_str(json_str)
        .map_err(|e| format!("Invalid AUTH_API_SECRETS_JSON format: {e}"))?;

    Ok(secrets
        .into_iter()
        .map(|entry| AuthApiSecret {
            id: entry.id,
            secret: entry.secret,
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    /// Configuration with defaults and no credentials
    pub(crate) fn test_config() -> ServerConfig {
        ServerConfig {
            host: "localhost".to_string(),
            port: 3001,
            tls: None,
            provider_api_url: DEFAULT_PROVIDER_API_URL.to_string(),
            provider_api_key: None,
            provider_api_secret: None,
            provider_application_id: None,
            provider_private_key_path: None,
            provider_from_number: None,
            provider_timeout_seconds: 10,
            public_base_url: None,
            webhook_signature_secret: None,
            answer_greeting: None,
            webhook_dedup_ttl_seconds: 600,
            session_retention_seconds: 300,
            pending_grace_seconds: 30,
            sweep_interval_ms: 5000,
            max_cas_retries: 3,
            fanout_queue_size: 256,
            auth_api_secrets: Vec::new(),
            auth_required: false,
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_websocket_connections: None,
            max_connections_per_ip: 100,
        }
    }

    #[test]
    fn test_address_and_tls() {
        let mut config = test_config();
        assert_eq!(config.address(), "localhost:3001");
        assert!(!config.is_tls_enabled());

        config.tls = Some(TlsConfig {
            cert_path: PathBuf::from("/tmp/cert.pem"),
            key_path: PathBuf::from("/tmp/key.pem"),
        });
        assert!(config.is_tls_enabled());
    }

    #[test]
    fn test_webhook_urls_from_public_base() {
        let mut config = test_config();
        assert_eq!(config.answer_url(), None);

        config.public_base_url = Some("https://gw.example.com/".to_string());
        assert_eq!(
            config.answer_url().as_deref(),
            Some("https://gw.example.com/webhooks/answer")
        );
        assert_eq!(
            config.event_url().as_deref(),
            Some("https://gw.example.com/webhooks/event")
        );
    }

    #[test]
    fn test_durations() {
        let config = test_config();
        assert_eq!(config.provider_timeout(), Duration::from_secs(10));
        assert_eq!(config.pending_grace(), Duration::from_secs(30));
        assert_eq!(config.sweep_interval(), Duration::from_millis(5000));
        assert_eq!(config.session_retention(), Duration::from_secs(300));
    }

    #[test]
    fn test_parse_auth_api_secrets_json() {
        let secrets =
            parse_auth_api_secrets_json(r#"[{"id":"ops","secret":"s1"},{"id":"crm","secret":"s2"}]"#)
                .unwrap();
        assert_eq!(secrets.len(), 2);
        assert_eq!(secrets[1].id, "crm");

        assert!(parse_auth_api_secrets_json("not json").is_err());
    }

    // Helper to clean up environment variables
    pub(crate) fn cleanup_env_vars() {
        unsafe {
            for key in [
                "HOST",
                "PORT",
                "TLS_ENABLED",
                "TLS_CERT_PATH",
                "TLS_KEY_PATH",
                "PROVIDER_API_URL",
                "PROVIDER_API_KEY",
                "PROVIDER_API_SECRET",
                "PROVIDER_APPLICATION_ID",
                "PROVIDER_PRIVATE_KEY_PATH",
                "PROVIDER_FROM_NUMBER",
                "PROVIDER_TIMEOUT_SECONDS",
                "PUBLIC_BASE_URL",
                "WEBHOOK_SIGNATURE_SECRET",
                "ANSWER_GREETING",
                "WEBHOOK_DEDUP_TTL_SECONDS",
                "SESSION_RETENTION_SECONDS",
                "PENDING_GRACE_SECONDS",
                "SWEEP_INTERVAL_MS",
                "MAX_CAS_RETRIES",
                "FANOUT_QUEUE_SIZE",
                "AUTH_REQUIRED",
                "AUTH_API_SECRETS_JSON",
                "AUTH_API_SECRET",
                "AUTH_API_SECRET_ID",
                "CORS_ALLOWED_ORIGINS",
                "RATE_LIMIT_REQUESTS_PER_SECOND",
                "RATE_LIMIT_BURST_SIZE",
                "MAX_WEBSOCKET_CONNECTIONS",
                "MAX_CONNECTIONS_PER_IP",
            ] {
                env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_only() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
server:
  host: "127.0.0.1"
  port: 8080

provider:
  api_key: "yaml-key"
  api_secret: "yaml-secret"
  from_number: "14155550100"

sessions:
  pending_grace_seconds: 45
  fanout_queue_size: 64
"#;

        fs::write(&config_path, yaml_content).unwrap();

        let config = ServerConfig::from_file(&config_path).unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.provider_api_key, Some("yaml-key".to_string()));
        assert_eq!(config.provider_from_number, Some("14155550100".to_string()));
        assert_eq!(config.pending_grace_seconds, 45);
        assert_eq!(config.fanout_queue_size, 64);
        // Untouched values keep their defaults
        assert_eq!(config.session_retention_seconds, 300);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
server:
  host: "127.0.0.1"

webhooks:
  answer_greeting: "Hello from YAML"
"#;

        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var("HOST", "0.0.0.0");
            env::set_var("PORT", "4000");
            env::set_var("ANSWER_GREETING", "Hello from env");
        }

        let config = ServerConfig::from_file(&config_path).unwrap();

        assert_eq!(config.host, "127.0.0.1");
        // Not in YAML, so the environment wins
        assert_eq!(config.port, 4000);
        assert_eq!(config.answer_greeting.as_deref(), Some("Hello from YAML"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_rejects_auth_required_without_secrets() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "auth:\n  required: true\n").unwrap();

        let err = ServerConfig::from_file(&config_path).unwrap_err();
        assert!(err.to_string().contains("AUTH_REQUIRED"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();
        let result = ServerConfig::from_file(&PathBuf::from("/nonexistent/gateway.yaml"));
        assert!(result.is_err());
    }
}
