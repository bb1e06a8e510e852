use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, StorageBackend};
use crate::identity::{Hs256Verifier, IdentityVerifier};
use crate::mailbox::Mailbox;
use crate::registry::Registry;
use crate::storage::{self, Stores};

/// Shared application state. Every store is an explicit value here; there
/// are no process-wide tables.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub mailbox: Arc<Mailbox>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub backend: StorageBackend,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: &Config,
        stores: Stores,
        clock: Arc<dyn Clock>,
        identity: Arc<dyn IdentityVerifier>,
    ) -> Self {
        let registry = Registry::new(
            stores.sessions,
            clock.clone(),
            config.session_ttl(),
            config.code_retries,
        );
        let mailbox = Mailbox::new(
            stores.mailboxes,
            clock,
            config.mailbox_ttl(),
            config.mailbox_capacity,
            config.max_payload_bytes,
        );
        Self {
            registry: Arc::new(registry),
            mailbox: Arc::new(mailbox),
            identity,
            backend: config.backend,
            metrics: None,
        }
    }

    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let stores = storage::open(config).await?;
        let identity = Hs256Verifier::from_config(config);
        if !identity.is_enabled() {
            tracing::warn!("JWT_SECRET not set; authenticated routes will reject every request");
        }
        Ok(Self::new(
            config,
            stores,
            Arc::new(SystemClock),
            Arc::new(identity),
        ))
    }

    /// In-memory state driven by `clock`, for tests and embedding.
    pub fn in_memory(
        config: &Config,
        clock: Arc<dyn Clock>,
        identity: Arc<dyn IdentityVerifier>,
    ) -> Self {
        let config = Config {
            backend: StorageBackend::Memory,
            ..config.clone()
        };
        Self::new(&config, Stores::in_memory(), clock, identity)
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn stores(&self) -> Stores {
        Stores {
            sessions: self.registry.store(),
            mailboxes: self.mailbox.store(),
        }
    }
}
