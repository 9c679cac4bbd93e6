use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::ServerConfig;
use crate::core::fallback::FallbackOrchestrator;
use crate::core::provider::{AdapterFactory, default_adapter_factory};
use crate::core::realtime::RealtimeBridge;
use crate::core::registry::{ProviderRegistry, RegistryError};

/// Reason a WebSocket connection slot could not be acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// Application state shared by all handlers
pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<ProviderRegistry>,
    pub orchestrator: FallbackOrchestrator,
    pub bridge: RealtimeBridge,

    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, usize>,
}

impl AppState {
    /// Build state with the default adapter factory, registering every
    /// configured provider.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, RegistryError> {
        Self::with_factory(config, default_adapter_factory())
    }

    pub fn with_factory(
        config: ServerConfig,
        factory: AdapterFactory,
    ) -> Result<Arc<Self>, RegistryError> {
        let registry = Arc::new(ProviderRegistry::with_providers(
            factory,
            config.provider_configs(),
        )?);
        let orchestrator = FallbackOrchestrator::new(registry.clone())
            .with_stream_buffer(config.fallback.stream_buffer_chunks);
        let bridge = RealtimeBridge::new(registry.clone(), config.realtime.bridge_settings());

        tracing::info!(providers = registry.len(), "Application state initialized");

        Ok(Arc::new(Self {
            config,
            registry,
            orchestrator,
            bridge,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        }))
    }

    /// Reserve a WebSocket slot for `ip`, honoring the global and per-IP limits.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let per_ip_limit = self.config.max_connections_per_ip as usize;

        // The entry guard serializes acquisitions for the same IP.
        let mut entry = self.ip_connections.entry(ip).or_insert(0);
        if *entry >= per_ip_limit {
            return Err(ConnectionLimitError::PerIpLimitReached);
        }

        if let Some(max) = self.config.max_websocket_connections {
            let acquired = self
                .ws_connections
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    (current < max).then_some(current + 1)
                })
                .is_ok();
            if !acquired {
                drop(entry);
                self.ip_connections.remove_if(&ip, |_, count| *count == 0);
                return Err(ConnectionLimitError::GlobalLimitReached);
            }
        } else {
            self.ws_connections.fetch_add(1, Ordering::AcqRel);
        }

        *entry += 1;
        Ok(())
    }

    pub fn release_connection(&self, ip: IpAddr) {
        let remove = match self.ip_connections.get_mut(&ip) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => return,
        };
        if remove {
            self.ip_connections.remove_if(&ip, |_, count| *count == 0);
        }
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> usize {
        self.ip_connections.get(ip).map(|c| *c).unwrap_or(0)
    }
}
