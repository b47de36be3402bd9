use std::path::PathBuf;

use super::yaml::YamlConfig;
use super::{AuthApiSecret, ServerConfig, TlsConfig};

/// Overwrite `target` when the YAML value is present.
fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

/// Overwrite an optional `target` when the YAML value is present.
fn set_opt<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

/// Build the final configuration: environment (with defaults) as the base,
/// YAML values layered on top.
pub fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = ServerConfig::from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        set(&mut config.host, server.host);
        set(&mut config.port, server.port);
        if let Some(tls) = server.tls {
            match tls.enabled {
                Some(false) => config.tls = None,
                Some(true) => {
                    let cert_path = tls
                        .cert_path
                        .ok_or("server.tls.enabled is true but cert_path is missing")?;
                    let key_path = tls
                        .key_path
                        .ok_or("server.tls.enabled is true but key_path is missing")?;
                    config.tls = Some(TlsConfig {
                        cert_path: PathBuf::from(cert_path),
                        key_path: PathBuf::from(key_path),
                    });
                }
                None => {}
            }
        }
    }

    if let Some(provider) = yaml.provider {
        set(&mut config.provider_api_url, provider.api_url);
        set_opt(&mut config.provider_api_key, provider.api_key);
        set_opt(&mut config.provider_api_secret, provider.api_secret);
        set_opt(&mut config.provider_application_id, provider.application_id);
        set_opt(
            &mut config.provider_private_key_path,
            provider.private_key_path.map(PathBuf::from),
        );
        set_opt(&mut config.provider_from_number, provider.from_number);
        set(&mut config.provider_timeout_seconds, provider.timeout_seconds);
    }

    if let Some(webhooks) = yaml.webhooks {
        set_opt(&mut config.public_base_url, webhooks.public_base_url);
        set_opt(&mut config.webhook_signature_secret, webhooks.signature_secret);
        set_opt(&mut config.answer_greeting, webhooks.answer_greeting);
        set(&mut config.webhook_dedup_ttl_seconds, webhooks.dedup_ttl_seconds);
    }

    if let Some(sessions) = yaml.sessions {
        set(&mut config.session_retention_seconds, sessions.retention_seconds);
        set(&mut config.pending_grace_seconds, sessions.pending_grace_seconds);
        set(&mut config.sweep_interval_ms, sessions.sweep_interval_ms);
        set(&mut config.max_cas_retries, sessions.max_cas_retries);
        set(&mut config.fanout_queue_size, sessions.fanout_queue_size);
    }

    if let Some(auth) = yaml.auth {
        set(&mut config.auth_required, auth.required);
        if !auth.api_secrets.is_empty() {
            config.auth_api_secrets = auth
                .api_secrets
                .into_iter()
                .map(|entry| AuthApiSecret {
                    id: entry.id,
                    secret: entry.secret,
                })
                .collect();
        } else if let Some(secret) = auth.api_secret {
            config.auth_api_secrets = vec![AuthApiSecret {
                id: "default".to_string(),
                secret,
            }];
        }
    }

    if let Some(security) = yaml.security {
        set_opt(&mut config.cors_allowed_origins, security.cors_allowed_origins);
        set(
            &mut config.rate_limit_requests_per_second,
            security.rate_limit_requests_per_second,
        );
        set(&mut config.rate_limit_burst_size, security.rate_limit_burst_size);
        set_opt(
            &mut config.max_websocket_connections,
            security.max_websocket_connections,
        );
        set(&mut config.max_connections_per_ip, security.max_connections_per_ip);
    }

    Ok(config)
}
