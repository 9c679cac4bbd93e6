//! Provider registry.
//!
//! Holds configured provider instances keyed by a caller-chosen id. Adapters
//! are constructed lazily on first resolve and cached; concurrent first
//! resolves of the same id share a single construction.
//!
//! Entries are reference counted, so removing an id never invalidates a
//! [`ProviderRef`] that an in-flight operation already holds.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::core::provider::{
    AdapterFactory, ProviderAdapter, ProviderConfig, ProviderError, default_adapter_factory,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Provider config with id '{0}' not found")]
    NotFound(String),
    #[error("Provider config with id '{0}' already exists")]
    Conflict(String),
    #[error("Invalid provider id '{0}'")]
    InvalidId(String),
    #[error("Failed to construct provider '{id}': {source}")]
    Construction {
        id: String,
        #[source]
        source: ProviderError,
    },
}

impl From<RegistryError> for ProviderError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Construction { source, .. } => source,
            // An unknown id fails only this attempt; the next one may be fine.
            RegistryError::NotFound(_) => {
                ProviderError::invalid_request(err.to_string()).with_retryable(true)
            }
            RegistryError::Conflict(_) | RegistryError::InvalidId(_) => {
                ProviderError::invalid_request(err.to_string())
            }
        }
    }
}

struct RegistryEntry {
    config: ProviderConfig,
    adapter: OnceCell<Arc<dyn ProviderAdapter>>,
}

/// A resolved provider: its id, config and shared adapter handle.
#[derive(Clone)]
pub struct ProviderRef {
    id: Arc<str>,
    entry: Arc<RegistryEntry>,
    adapter: Arc<dyn ProviderAdapter>,
}

impl ProviderRef {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.entry.config
    }

    pub fn adapter(&self) -> &dyn ProviderAdapter {
        self.adapter.as_ref()
    }

    /// Reject models blacklisted for this provider instance.
    pub fn check_model(&self, model: &str) -> Result<(), ProviderError> {
        if self.entry.config.is_model_allowed(model) {
            Ok(())
        } else {
            Err(ProviderError::invalid_request(format!(
                "Model '{model}' is blacklisted for provider '{}'",
                self.id
            ))
            .with_retryable(true))
        }
    }
}

impl fmt::Debug for ProviderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRef")
            .field("id", &self.id)
            .field("provider", &self.entry.config.provider)
            .finish()
    }
}

/// Summary of a registered provider, with the API key masked.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderSummary {
    pub id: String,
    pub provider: String,
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub blacklist_models: Vec<String>,
    pub initialized: bool,
}

pub struct ProviderRegistry {
    entries: DashMap<String, Arc<RegistryEntry>>,
    factory: AdapterFactory,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(default_adapter_factory())
    }
}

impl ProviderRegistry {
    pub fn new(factory: AdapterFactory) -> Self {
        Self {
            entries: DashMap::new(),
            factory,
        }
    }

    /// Build a registry pre-populated with `(id, config)` pairs.
    pub fn with_providers<I>(factory: AdapterFactory, providers: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = (String, ProviderConfig)>,
    {
        let registry = Self::new(factory);
        for (id, config) in providers {
            registry.register(&id, config)?;
        }
        Ok(registry)
    }

    pub fn register(&self, id: &str, config: ProviderConfig) -> Result<(), RegistryError> {
        if id.trim().is_empty() {
            return Err(RegistryError::InvalidId(id.to_string()));
        }
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::Conflict(id.to_string())),
            Entry::Vacant(slot) => {
                tracing::debug!(provider_id = %id, provider = %config.provider, "Registered provider");
                slot.insert(Arc::new(RegistryEntry {
                    config,
                    adapter: OnceCell::new(),
                }));
                Ok(())
            }
        }
    }

    pub fn remove(&self, id: &str) -> Result<(), RegistryError> {
        match self.entries.remove(id) {
            Some(_) => {
                tracing::debug!(provider_id = %id, "Removed provider");
                Ok(())
            }
            None => Err(RegistryError::NotFound(id.to_string())),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up `id`, constructing its adapter on first use.
    pub async fn resolve(&self, id: &str) -> Result<ProviderRef, RegistryError> {
        // Clone the entry out so no map guard is held across the await.
        let entry = self
            .entries
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let adapter = entry
            .adapter
            .get_or_try_init(|| {
                let factory = self.factory.clone();
                let config = entry.config.clone();
                let id = id.to_string();
                async move { factory(id, config).await }
            })
            .await
            .map_err(|source| RegistryError::Construction {
                id: id.to_string(),
                source,
            })?
            .clone();

        Ok(ProviderRef {
            id: Arc::from(id),
            entry,
            adapter,
        })
    }

    pub fn list(&self) -> Vec<ProviderSummary> {
        let mut summaries: Vec<ProviderSummary> = self
            .entries
            .iter()
            .map(|item| {
                let config = &item.value().config;
                ProviderSummary {
                    id: item.key().clone(),
                    provider: config.provider.to_string(),
                    api_key: config.masked_api_key(),
                    base_url: config.base_url.clone(),
                    blacklist_models: config.blacklist_models.clone(),
                    initialized: item.value().adapter.initialized(),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Drop every entry and close adapters that were constructed.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                if let Some(adapter) = entry.adapter.get() {
                    adapter.close().await;
                    tracing::debug!(provider_id = %id, "Closed provider adapter");
                }
            }
        }
        tracing::info!("Provider registry shut down");
    }
}
