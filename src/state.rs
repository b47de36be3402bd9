use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::auth::WebhookVerifier;
use crate::config::ServerConfig;
use crate::core::dispatcher::{CommandDispatcher, DispatcherConfig};
use crate::core::events::{DEFAULT_DEDUP_CAPACITY, EventNormalizer};
use crate::core::fanout::RealtimeFanout;
use crate::core::ingest::EventIngestor;
use crate::core::metrics::GatewayMetrics;
use crate::core::provider::{
    HttpVoiceProvider, ProviderCredentials, ProviderError, ProviderResult, VoiceProvider,
};
use crate::core::reconcile::{ReconciliationSweeper, SweepConfig};
use crate::core::session::{DEFAULT_NOTIFY_CAPACITY, SessionStore};

/// Why a WebSocket connection was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// Shared application state
///
/// Owns the session store and every component wired around it. Background
/// tasks (fanout pump, reconciliation sweep) are started on construction and
/// stopped by [`AppState::shutdown`].
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<SessionStore>,
    pub ingestor: EventIngestor,
    pub dispatcher: Arc<CommandDispatcher>,
    pub fanout: Arc<RealtimeFanout>,
    pub sweeper: Arc<ReconciliationSweeper>,
    pub metrics: Arc<GatewayMetrics>,
    /// Present when webhooks must be signed
    pub webhook_verifier: Option<WebhookVerifier>,

    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,

    // WebSocket connection tracking
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,
}

/// Provider credentials implied by the configuration.
fn provider_credentials(config: &ServerConfig) -> ProviderResult<ProviderCredentials> {
    if let (Some(application_id), Some(key_path)) = (
        &config.provider_application_id,
        &config.provider_private_key_path,
    ) {
        let pem = std::fs::read(key_path).map_err(|e| {
            ProviderError::new(
                "configuration",
                format!("Failed to read private key {}: {e}", key_path.display()),
            )
        })?;
        return ProviderCredentials::application(application_id.clone(), &pem);
    }

    if let (Some(api_key), Some(api_secret)) =
        (&config.provider_api_key, &config.provider_api_secret)
    {
        return Ok(ProviderCredentials::Basic {
            api_key: api_key.clone(),
            api_secret: api_secret.clone(),
        });
    }

    warn!("No provider credentials configured; provider requests will be unauthenticated");
    Ok(ProviderCredentials::Anonymous)
}

impl AppState {
    /// Build state with the REST provider described by `config`.
    pub async fn new(config: ServerConfig) -> ProviderResult<Arc<Self>> {
        let credentials = provider_credentials(&config)?;
        let provider = HttpVoiceProvider::new(
            config.provider_api_url.clone(),
            credentials,
            config.provider_timeout(),
        )?;
        info!(api_url = %config.provider_api_url, "Voice provider client ready");
        Ok(Self::with_provider(config, Arc::new(provider)).await)
    }

    /// Build state around an existing provider implementation.
    pub async fn with_provider(config: ServerConfig, provider: Arc<dyn VoiceProvider>) -> Arc<Self> {
        let metrics = Arc::new(GatewayMetrics::new());
        let store = Arc::new(SessionStore::new(
            config.max_cas_retries,
            DEFAULT_NOTIFY_CAPACITY,
        ));

        let normalizer = EventNormalizer::new(config.webhook_dedup_ttl(), DEFAULT_DEDUP_CAPACITY);
        let ingestor = EventIngestor::new(store.clone(), normalizer, metrics.clone());

        let dispatcher = Arc::new(CommandDispatcher::new(
            store.clone(),
            provider,
            metrics.clone(),
            DispatcherConfig {
                provider_timeout: config.provider_timeout(),
                default_from: config.provider_from_number.clone(),
                answer_url: config.answer_url(),
                event_url: config.event_url(),
                ..DispatcherConfig::default()
            },
        ));

        let fanout = Arc::new(RealtimeFanout::new(config.fanout_queue_size, metrics.clone()));
        let sweeper = Arc::new(ReconciliationSweeper::new(
            store.clone(),
            metrics.clone(),
            SweepConfig {
                pending_grace: config.pending_grace(),
                retention: config.session_retention(),
                interval: config.sweep_interval(),
            },
        ));

        let webhook_verifier = config
            .webhook_signature_secret
            .as_deref()
            .map(WebhookVerifier::new);
        if webhook_verifier.is_none() {
            warn!("WEBHOOK_SIGNATURE_SECRET not set; webhooks are accepted unsigned");
        }

        let shutdown = CancellationToken::new();
        let tasks = vec![
            fanout.clone().spawn_pump(store.subscribe(), shutdown.child_token()),
            sweeper.clone().spawn(shutdown.child_token()),
        ];

        Arc::new(Self {
            config,
            store,
            ingestor,
            dispatcher,
            fanout,
            sweeper,
            metrics,
            webhook_verifier,
            shutdown,
            tasks: Mutex::new(tasks),
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    /// Token cancelled when the server shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Background tasks stopped");
    }

    // =========================================================================
    // Connection tracking
    // =========================================================================

    /// Reserve a WebSocket slot for `ip`.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        // Per-IP check and increment happen under the entry lock
        let mut per_ip = self.ip_connections.entry(ip).or_insert(0);
        if *per_ip >= self.config.max_connections_per_ip {
            return Err(ConnectionLimitError::PerIpLimitReached);
        }

        if let Some(max) = self.config.max_websocket_connections {
            let reserved = self
                .ws_connections
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    (current < max).then_some(current + 1)
                });
            if reserved.is_err() {
                drop(per_ip);
                self.ip_connections.remove_if(&ip, |_, count| *count == 0);
                return Err(ConnectionLimitError::GlobalLimitReached);
            }
        } else {
            self.ws_connections.fetch_add(1, Ordering::AcqRel);
        }

        *per_ip += 1;
        Ok(())
    }

    /// Give back a slot taken by [`AppState::try_acquire_connection`].
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
        self.ip_connections.remove_if_mut(&ip, |_, count| {
            *count = count.saturating_sub(1);
            *count == 0
        });
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|c| *c).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::core::dispatcher::tests::ScriptedProvider;
    use std::net::Ipv4Addr;

    async fn state_with_limits(global: Option<usize>, per_ip: u32) -> Arc<AppState> {
        let mut config = test_config();
        config.max_websocket_connections = global;
        config.max_connections_per_ip = per_ip;
        AppState::with_provider(config, Arc::new(ScriptedProvider::default())).await
    }

    #[tokio::test]
    async fn test_connection_tracking_basic() {
        let state = state_with_limits(Some(10), 3).await;
        let ip: IpAddr = Ipv4Addr::new(192, 168, 1, 100).into();

        assert_eq!(state.ws_connection_count(), 0);
        for expected in 1..=3 {
            assert!(state.try_acquire_connection(ip).is_ok());
            assert_eq!(state.ip_connection_count(&ip), expected);
        }

        assert_eq!(
            state.try_acquire_connection(ip),
            Err(ConnectionLimitError::PerIpLimitReached)
        );
        assert_eq!(state.ws_connection_count(), 3);

        state.release_connection(ip);
        assert_eq!(state.ws_connection_count(), 2);
        assert!(state.try_acquire_connection(ip).is_ok());

        for _ in 0..3 {
            state.release_connection(ip);
        }
        assert_eq!(state.ip_connection_count(&ip), 0);
        assert_eq!(state.ws_connection_count(), 0);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_global_connection_limit() {
        let state = state_with_limits(Some(5), 10).await;
        let ips: Vec<IpAddr> = (1..=6)
            .map(|i| Ipv4Addr::new(192, 168, 1, i).into())
            .collect();

        for ip in &ips[0..5] {
            assert!(state.try_acquire_connection(*ip).is_ok());
        }
        assert_eq!(
            state.try_acquire_connection(ips[5]),
            Err(ConnectionLimitError::GlobalLimitReached)
        );
        // The refused attempt must not leak a per-IP slot
        assert_eq!(state.ip_connection_count(&ips[5]), 0);

        state.release_connection(ips[0]);
        assert!(state.try_acquire_connection(ips[5]).is_ok());
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_new_rejects_missing_private_key() {
        let mut config = test_config();
        config.provider_application_id = Some("app".to_string());
        config.provider_private_key_path = Some("/nonexistent/private.key".into());

        let err = AppState::new(config).await.err().unwrap();
        assert_eq!(err.code, "configuration");
    }

    #[tokio::test]
    async fn test_webhook_verifier_follows_config() {
        let mut config = test_config();
        config.webhook_signature_secret = Some("sig".to_string());
        let state = AppState::with_provider(config, Arc::new(ScriptedProvider::default())).await;
        assert!(state.webhook_verifier.is_some());
        state.shutdown().await;
    }
}
