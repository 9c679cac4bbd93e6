use std::path::PathBuf;

use super::env::{EnvConfig, provider_api_key};
use super::yaml::{ProviderYaml, YamlConfig};
use super::{AuthApiSecret, ProviderEntry, ServerConfig, TlsConfig};
use crate::core::provider::ProviderConfig;

/// Build a [`ServerConfig`] from environment variables, with YAML values
/// taking precedence when given.
///
/// Providers merge by id: a YAML entry replaces the environment entry with
/// the same id, and environment-only providers are kept after the YAML ones.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let env = EnvConfig::load()?;
    let yaml = yaml.unwrap_or_default();

    let server = yaml.server.unwrap_or_default();
    let host = server.host.unwrap_or(env.host);
    let port = server.port.unwrap_or(env.port);

    let tls = match server.tls {
        Some(tls) if tls.enabled == Some(false) => None,
        Some(tls) => match (tls.cert_path, tls.key_path) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => env.tls,
            _ => return Err("server.tls requires both cert_path and key_path".into()),
        },
        None => env.tls,
    };

    let providers = merge_providers(yaml.providers.unwrap_or_default(), env.providers)?;

    let auth = yaml.auth.unwrap_or_default();
    let auth_api_secrets = match auth.api_secrets {
        Some(secrets) => secrets
            .into_iter()
            .map(|s| AuthApiSecret {
                id: s.id,
                secret: s.secret,
            })
            .collect(),
        None => env.auth_api_secrets,
    };
    let auth_required = auth
        .required
        .or(env.auth_required)
        .unwrap_or(!auth_api_secrets.is_empty());

    let security = yaml.security.unwrap_or_default();

    let fallback_yaml = yaml.fallback.unwrap_or_default();
    let mut fallback = env.fallback;
    if let Some(v) = fallback_yaml.default_timeout_per_request_secs {
        fallback.default_timeout_per_request_secs = v;
    }
    if let Some(v) = fallback_yaml.max_attempts {
        fallback.max_attempts = v;
    }
    if let Some(v) = fallback_yaml.stream_buffer_chunks {
        fallback.stream_buffer_chunks = v;
    }

    let realtime_yaml = yaml.realtime.unwrap_or_default();
    let mut realtime = env.realtime;
    if let Some(v) = realtime_yaml.idle_timeout_secs {
        realtime.idle_timeout_secs = v;
    }
    if let Some(v) = realtime_yaml.init_timeout_secs {
        realtime.init_timeout_secs = v;
    }
    if let Some(v) = realtime_yaml.drain_timeout_secs {
        realtime.drain_timeout_secs = v;
    }
    if let Some(v) = realtime_yaml.provider_connect_timeout_secs {
        realtime.provider_connect_timeout_secs = v;
    }
    if let Some(v) = realtime_yaml.frame_duration_ms {
        realtime.frame_duration_ms = v;
    }

    Ok(ServerConfig {
        host,
        port,
        tls,
        providers,
        auth_api_secrets,
        auth_required,
        cors_allowed_origins: security.cors_allowed_origins.or(env.cors_allowed_origins),
        rate_limit_requests_per_second: security
            .rate_limit_requests_per_second
            .unwrap_or(env.rate_limit_requests_per_second),
        rate_limit_burst_size: security
            .rate_limit_burst_size
            .unwrap_or(env.rate_limit_burst_size),
        max_websocket_connections: security
            .max_websocket_connections
            .or(env.max_websocket_connections),
        max_connections_per_ip: security
            .max_connections_per_ip
            .unwrap_or(env.max_connections_per_ip),
        fallback,
        realtime,
    })
}

fn merge_providers(
    yaml: Vec<ProviderYaml>,
    env: Vec<ProviderEntry>,
) -> Result<Vec<ProviderEntry>, Box<dyn std::error::Error>> {
    let mut merged = Vec::with_capacity(yaml.len() + env.len());

    for entry in yaml {
        let api_key = match entry.api_key.filter(|k| !k.trim().is_empty()) {
            Some(key) => key,
            None => provider_api_key(entry.provider).ok_or_else(|| {
                format!(
                    "Provider '{}' has no api_key and {} is not configured in the environment",
                    entry.id, entry.provider
                )
            })?,
        };
        let mut config = ProviderConfig::new(entry.provider, api_key);
        config.base_url = entry.base_url;
        config.blacklist_models = entry.blacklist_models;
        merged.push(ProviderEntry {
            id: entry.id,
            config,
        });
    }

    for entry in env {
        if !merged.iter().any(|p: &ProviderEntry| p.id == entry.id) {
            merged.push(entry);
        }
    }

    Ok(merged)
}
