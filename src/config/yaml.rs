use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration; anything left out
/// falls back to the environment and then to defaults.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///   tls:
///     enabled: true
///     cert_path: "/etc/gateway/cert.pem"
///     key_path: "/etc/gateway/key.pem"
///
/// provider:
///   api_url: "https://api.nexmo.com"
///   application_id: "aaaaaaaa-bbbb-cccc-dddd-0123456789ab"
///   private_key_path: "/etc/gateway/private.key"
///   from_number: "14155550100"
///   timeout_seconds: 10
///
/// webhooks:
///   public_base_url: "https://gateway.example.com"
///   signature_secret: "shared-signing-secret"
///   answer_greeting: "Please hold while we connect you."
///   dedup_ttl_seconds: 600
///
/// sessions:
///   retention_seconds: 300
///   pending_grace_seconds: 30
///   sweep_interval_ms: 5000
///   max_cas_retries: 3
///   fanout_queue_size: 256
///
/// auth:
///   required: true
///   api_secrets:
///     - id: "crm"
///       secret: "your-api-secret"
///
/// security:
///   cors_allowed_origins: "https://app.example.com"
///   rate_limit_requests_per_second: 60
///   rate_limit_burst_size: 10
///   max_websocket_connections: 1000
///   max_connections_per_ip: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub provider: Option<ProviderYaml>,
    pub webhooks: Option<WebhooksYaml>,
    pub sessions: Option<SessionsYaml>,
    pub auth: Option<AuthYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Voice provider settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProviderYaml {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub application_id: Option<String>,
    pub private_key_path: Option<String>,
    pub from_number: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Webhook handling from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WebhooksYaml {
    pub public_base_url: Option<String>,
    pub signature_secret: Option<String>,
    pub answer_greeting: Option<String>,
    pub dedup_ttl_seconds: Option<u64>,
}

/// Session lifecycle tuning from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionsYaml {
    pub retention_seconds: Option<u64>,
    pub pending_grace_seconds: Option<u64>,
    pub sweep_interval_ms: Option<u64>,
    pub max_cas_retries: Option<usize>,
    pub fanout_queue_size: Option<usize>,
}

/// Authentication configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthYaml {
    pub required: Option<bool>,
    /// Preferred multi-secret form. If non-empty, it takes precedence over api_secret.
    #[serde(default)]
    pub api_secrets: Vec<AuthApiSecretYaml>,
    /// Legacy single-secret alias. Ignored when api_secrets is non-empty.
    pub api_secret: Option<String>,
}

/// API secret authentication entry in YAML
#[derive(Debug, Clone, Deserialize)]
pub struct AuthApiSecretYaml {
    pub id: String,
    pub secret: String,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
