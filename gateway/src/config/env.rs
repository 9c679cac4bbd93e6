use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::{AuthApiSecret, FallbackSettings, ProviderEntry, RealtimeSettings, TlsConfig};
use crate::core::provider::{ProviderConfig, ProviderKind};

/// Client id given to the secret read from `MASTER_API_KEY`.
pub(super) const MASTER_SECRET_ID: &str = "master";

/// Configuration read from environment variables, before YAML is applied.
pub(super) struct EnvConfig {
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,
    pub providers: Vec<ProviderEntry>,
    pub auth_api_secrets: Vec<AuthApiSecret>,
    pub auth_required: Option<bool>,
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: u32,
    pub rate_limit_burst_size: u32,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: u32,
    pub fallback: FallbackSettings,
    pub realtime: RealtimeSettings,
}

impl EnvConfig {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let tls = match (env_var("TLS_CERT_PATH"), env_var("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => None,
            _ => {
                return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".into());
            }
        };

        let providers = ProviderKind::all()
            .into_iter()
            .filter_map(|kind| {
                let api_key = provider_api_key(kind)?;
                let mut config = ProviderConfig::new(kind, api_key);
                config.base_url = env_var(&format!("{}_BASE_URL", env_prefix(kind)));
                Some(ProviderEntry {
                    id: kind.to_string(),
                    config,
                })
            })
            .collect();

        let mut auth_api_secrets = match env_var("AUTH_API_SECRETS_JSON") {
            Some(json) => parse_auth_api_secrets_json(&json)?,
            None => Vec::new(),
        };
        if let Some(master) = env_var("MASTER_API_KEY") {
            auth_api_secrets.push(AuthApiSecret {
                id: MASTER_SECRET_ID.to_string(),
                secret: master,
            });
        }

        let fallback_defaults = FallbackSettings::default();
        let realtime_defaults = RealtimeSettings::default();

        Ok(Self {
            host: env_var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_env("PORT", 8000)?,
            tls,
            providers,
            auth_api_secrets,
            auth_required: env_var("AUTH_REQUIRED")
                .map(|v| parse_bool("AUTH_REQUIRED", &v))
                .transpose()?,
            cors_allowed_origins: env_var("CORS_ALLOWED_ORIGINS"),
            rate_limit_requests_per_second: parse_env("RATE_LIMIT_REQUESTS_PER_SECOND", 60)?,
            rate_limit_burst_size: parse_env("RATE_LIMIT_BURST_SIZE", 10)?,
            max_websocket_connections: env_var("MAX_WEBSOCKET_CONNECTIONS")
                .map(|v| parse_value("MAX_WEBSOCKET_CONNECTIONS", &v))
                .transpose()?,
            max_connections_per_ip: parse_env("MAX_CONNECTIONS_PER_IP", 10)?,
            fallback: FallbackSettings {
                default_timeout_per_request_secs: parse_env(
                    "FALLBACK_TIMEOUT_SECS",
                    fallback_defaults.default_timeout_per_request_secs,
                )?,
                max_attempts: parse_env("FALLBACK_MAX_ATTEMPTS", fallback_defaults.max_attempts)?,
                stream_buffer_chunks: parse_env(
                    "STREAM_BUFFER_CHUNKS",
                    fallback_defaults.stream_buffer_chunks,
                )?,
            },
            realtime: RealtimeSettings {
                idle_timeout_secs: parse_env(
                    "REALTIME_IDLE_TIMEOUT_SECS",
                    realtime_defaults.idle_timeout_secs,
                )?,
                init_timeout_secs: parse_env(
                    "REALTIME_INIT_TIMEOUT_SECS",
                    realtime_defaults.init_timeout_secs,
                )?,
                drain_timeout_secs: parse_env(
                    "REALTIME_DRAIN_TIMEOUT_SECS",
                    realtime_defaults.drain_timeout_secs,
                )?,
                provider_connect_timeout_secs: parse_env(
                    "REALTIME_CONNECT_TIMEOUT_SECS",
                    realtime_defaults.provider_connect_timeout_secs,
                )?,
                frame_duration_ms: parse_env(
                    "REALTIME_FRAME_MS",
                    realtime_defaults.frame_duration_ms,
                )?,
            },
        })
    }
}

fn env_prefix(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAI => "OPENAI",
        ProviderKind::Groq => "GROQ",
        ProviderKind::ElevenLabs => "ELEVENLABS",
        ProviderKind::Gemini => "GEMINI",
    }
}

/// API key for a provider kind from `{KIND}_API_KEY`.
pub(super) fn provider_api_key(kind: ProviderKind) -> Option<String> {
    env_var(&format!("{}_API_KEY", env_prefix(kind)))
}

/// Read a variable, treating empty values as unset.
fn env_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_value<T>(name: &str, value: &str) -> Result<T, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| format!("Invalid value for {name} '{value}': {e}").into())
}

fn parse_env<T>(name: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(value) => parse_value(name, &value),
        None => Ok(default),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, Box<dyn std::error::Error>> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(format!("Invalid value for {name} '{value}': expected true or false").into()),
    }
}

/// Parse `[{"id": "...", "secret": "..."}]` from `AUTH_API_SECRETS_JSON`.
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
