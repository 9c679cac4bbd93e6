use std::collections::HashSet;

use super::{FallbackSettings, RealtimeSettings, ServerConfig};
use crate::core::fallback::MAX_ATTEMPTS;

/// Validate a merged configuration.
pub(super) fn validate(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    validate_server(config)?;
    validate_providers(config)?;
    validate_auth(config)?;
    validate_fallback(&config.fallback)?;
    validate_realtime(&config.realtime)?;
    Ok(())
}

fn validate_server(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.host.trim().is_empty() {
        return Err("Server host must not be empty".into());
    }
    if config.port == 0 {
        return Err("Server port must be greater than 0".into());
    }
    if config.rate_limit_requests_per_second == 0 || config.rate_limit_burst_size == 0 {
        return Err("Rate limit values must be greater than 0".into());
    }
    if config.max_connections_per_ip == 0 {
        return Err("max_connections_per_ip must be greater than 0".into());
    }
    if let Some(tls) = &config.tls {
        if !tls.cert_path.exists() {
            return Err(format!(
                "TLS certificate file not found: {}",
                tls.cert_path.display()
            )
            .into());
        }
        if !tls.key_path.exists() {
            return Err(format!("TLS key file not found: {}", tls.key_path.display()).into());
        }
    }
    Ok(())
}

fn validate_providers(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut seen = HashSet::new();
    for entry in &config.providers {
        if entry.id.trim().is_empty() {
            return Err("Provider id must not be empty".into());
        }
        if entry.config.api_key.trim().is_empty() {
            return Err(format!("Provider '{}' has an empty api_key", entry.id).into());
        }
        if !seen.insert(entry.id.as_str()) {
            return Err(format!("Duplicate provider id '{}'", entry.id).into());
        }
    }
    Ok(())
}

fn validate_auth(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut seen = HashSet::new();
    for secret in &config.auth_api_secrets {
        if secret.id.trim().is_empty() || secret.secret.is_empty() {
            return Err("Auth API secrets require a non-empty id and secret".into());
        }
        if !seen.insert(secret.id.as_str()) {
            return Err(format!("Duplicate auth API secret id '{}'", secret.id).into());
        }
    }
    if config.auth_required && config.auth_api_secrets.is_empty() {
        return Err(
            "Authentication is required but no API secrets are configured \
             (set MASTER_API_KEY, AUTH_API_SECRETS_JSON or auth.api_secrets)"
                .into(),
        );
    }
    Ok(())
}

fn validate_fallback(fallback: &FallbackSettings) -> Result<(), Box<dyn std::error::Error>> {
    if fallback.default_timeout_per_request_secs == 0 {
        return Err("fallback.default_timeout_per_request_secs must be greater than 0".into());
    }
    if fallback.max_attempts == 0 || fallback.max_attempts > MAX_ATTEMPTS {
        return Err(format!("fallback.max_attempts must be between 1 and {MAX_ATTEMPTS}").into());
    }
    if fallback.stream_buffer_chunks == 0 {
        return Err("fallback.stream_buffer_chunks must be greater than 0".into());
    }
    Ok(())
}

fn validate_realtime(realtime: &RealtimeSettings) -> Result<(), Box<dyn std::error::Error>> {
    let timeouts = [
        ("idle_timeout_secs", realtime.idle_timeout_secs),
        ("init_timeout_secs", realtime.init_timeout_secs),
        ("drain_timeout_secs", realtime.drain_timeout_secs),
        (
            "provider_connect_timeout_secs",
            realtime.provider_connect_timeout_secs,
        ),
    ];
    for (name, value) in timeouts {
        if value == 0 {
            return Err(format!("realtime.{name} must be greater than 0").into());
        }
    }
    if !(10..=1000).contains(&realtime.frame_duration_ms) {
        return Err("realtime.frame_duration_ms must be between 10 and 1000".into());
    }
    Ok(())
}
