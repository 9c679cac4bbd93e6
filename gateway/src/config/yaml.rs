use serde::Deserialize;
use std::path::PathBuf;

use crate::core::provider::ProviderKind;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values given here
/// take precedence over environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8000
///
/// providers:
///   - id: "openai-primary"
///     provider: "openai"
///     api_key: "sk-..."
///   - id: "groq-backup"
///     provider: "groq"
///     base_url: "https://api.groq.com/openai/v1"
///     blacklist_models: ["whisper-large-v3"]
///
/// auth:
///   required: true
///   api_secrets:
///     - id: "client-a"
///       secret: "your-api-secret"
///
/// security:
///   cors_allowed_origins: "https://app.example.com"
///   rate_limit_requests_per_second: 60
///   max_connections_per_ip: 10
///
/// fallback:
///   default_timeout_per_request_secs: 360
///   max_attempts: 16
///
/// realtime:
///   idle_timeout_secs: 300
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub providers: Option<Vec<ProviderYaml>>,
    pub auth: Option<AuthYaml>,
    pub security: Option<SecurityYaml>,
    pub fallback: Option<FallbackYaml>,
    pub realtime: Option<RealtimeYaml>,
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

/// One provider instance. `api_key` falls back to the kind's environment
/// variable when omitted.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderYaml {
    pub id: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub blacklist_models: Vec<String>,
}

/// Authentication configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthYaml {
    pub required: Option<bool>,
    pub api_secrets: Option<Vec<AuthApiSecretYaml>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthApiSecretYaml {
    pub id: String,
    pub secret: String,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FallbackYaml {
    pub default_timeout_per_request_secs: Option<u64>,
    pub max_attempts: Option<usize>,
    pub stream_buffer_chunks: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub idle_timeout_secs: Option<u64>,
    pub init_timeout_secs: Option<u64>,
    pub drain_timeout_secs: Option<u64>,
    pub provider_connect_timeout_secs: Option<u64>,
    pub frame_duration_ms: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Required fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
