//! Configuration module for the gateway server
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use voxgate_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod validation;
mod yaml;

use crate::core::provider::ProviderConfig;
use crate::core::realtime::BridgeSettings;

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// API secret authentication entry with a client identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthApiSecret {
    pub id: String,
    pub secret: String,
}

/// A provider instance registered at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEntry {
    pub id: String,
    pub config: ProviderConfig,
}

/// Defaults applied to fallback plans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackSettings {
    /// Per-attempt timeout when a request does not name one.
    pub default_timeout_per_request_secs: u64,
    /// Largest plan accepted over HTTP.
    pub max_attempts: usize,
    /// Chunks buffered between a committed provider stream and the client.
    pub stream_buffer_chunks: usize,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            default_timeout_per_request_secs: 360,
            max_attempts: 16,
            stream_buffer_chunks: 32,
        }
    }
}

impl FallbackSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_per_request_secs)
    }
}

/// Realtime transcription session limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeSettings {
    pub idle_timeout_secs: u64,
    pub init_timeout_secs: u64,
    pub drain_timeout_secs: u64,
    pub provider_connect_timeout_secs: u64,
    pub frame_duration_ms: u32,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            init_timeout_secs: 10,
            drain_timeout_secs: 5,
            provider_connect_timeout_secs: 15,
            frame_duration_ms: 20,
        }
    }
}

impl RealtimeSettings {
    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            init_timeout: Duration::from_secs(self.init_timeout_secs),
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            connect_timeout: Duration::from_secs(self.provider_connect_timeout_secs),
            frame_ms: self.frame_duration_ms,
        }
    }
}

/// Server configuration
///
/// Contains all configuration needed to run the gateway, including:
/// - Server settings (host, port, TLS)
/// - Provider instances available to fallback plans
/// - Authentication settings
/// - Security settings (CORS, rate limiting, connection limits)
/// - Fallback and realtime tuning
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Providers registered at startup
    pub providers: Vec<ProviderEntry>,

    // Authentication configuration
    pub auth_api_secrets: Vec<AuthApiSecret>,
    pub auth_required: bool,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 10
    pub max_connections_per_ip: u32,

    pub fallback: FallbackSettings,
    pub realtime: RealtimeSettings,
}

/// Zeroize auth secrets when the config is dropped. Provider keys are
/// zeroized by [`ProviderConfig`] itself.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        for secret in &mut self.auth_api_secrets {
            secret.secret.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only
    ///
    /// Missing values fall back to defaults. The `.env` file is loaded in
    /// `main.rs` before this is called.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Returns true if at least one API secret entry is configured
    pub fn has_api_secret_auth(&self) -> bool {
        !self.auth_api_secrets.is_empty()
    }

    /// `(id, config)` pairs for seeding the provider registry.
    pub fn provider_configs(&self) -> impl Iterator<Item = (String, ProviderConfig)> + '_ {
        self.providers
            .iter()
            .map(|entry| (entry.id.clone(), entry.config.clone()))
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> ServerConfig {
    ServerConfig {
        host: "localhost".to_string(),
        port: 8000,
        tls: None,
        providers: Vec::new(),
        auth_api_secrets: Vec::new(),
        auth_required: false,
        cors_allowed_origins: None,
        rate_limit_requests_per_second: 60,
        rate_limit_burst_size: 10,
        max_websocket_connections: None,
        max_connections_per_ip: 10,
        fallback: FallbackSettings::default(),
        realtime: RealtimeSettings::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::ProviderKind;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            env::remove_var("HOST");
            env::remove_var("PORT");
            env::remove_var("OPENAI_API_KEY");
            env::remove_var("OPENAI_BASE_URL");
            env::remove_var("GROQ_API_KEY");
            env::remove_var("GROQ_BASE_URL");
            env::remove_var("ELEVENLABS_API_KEY");
            env::remove_var("ELEVENLABS_BASE_URL");
            env::remove_var("GEMINI_API_KEY");
            env::remove_var("GEMINI_BASE_URL");
            env::remove_var("MASTER_API_KEY");
            env::remove_var("AUTH_API_SECRETS_JSON");
            env::remove_var("AUTH_REQUIRED");
            env::remove_var("FALLBACK_TIMEOUT_SECS");
            env::remove_var("REALTIME_IDLE_TIMEOUT_SECS");
        }
    }

    #[test]
    fn test_address_and_tls() {
        let mut config = test_config();
        assert_eq!(config.address(), "localhost:8000");
        assert!(!config.is_tls_enabled());
        config.tls = Some(TlsConfig {
            cert_path: PathBuf::from("/tmp/cert.pem"),
            key_path: PathBuf::from("/tmp/key.pem"),
        });
        assert!(config.is_tls_enabled());
    }

    #[test]
    fn test_bridge_settings_from_realtime() {
        let settings = RealtimeSettings::default().bridge_settings();
        assert_eq!(settings.idle_timeout, Duration::from_secs(300));
        assert_eq!(settings.init_timeout, Duration::from_secs(10));
        assert_eq!(settings.frame_ms, 20);
        assert_eq!(
            FallbackSettings::default().default_timeout(),
            Duration::from_secs(360)
        );
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert!(config.providers.is_empty());
        assert!(!config.auth_required);
        assert_eq!(config.rate_limit_requests_per_second, 60);
        assert_eq!(config.max_connections_per_ip, 10);
        assert_eq!(config.fallback, FallbackSettings::default());
        assert_eq!(config.realtime, RealtimeSettings::default());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_registers_providers_by_kind() {
        cleanup_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("GROQ_API_KEY", "gsk-env");
            env::set_var("GROQ_BASE_URL", "http://localhost:9999/v1");
            env::set_var("MASTER_API_KEY", "master-secret");
        }

        let config = ServerConfig::from_env().unwrap();
        let ids: Vec<&str> = config.providers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["openai", "groq"]);
        assert_eq!(
            config.providers[1].config.base_url.as_deref(),
            Some("http://localhost:9999/v1")
        );
        assert_eq!(config.auth_api_secrets[0].id, "master");
        assert!(config.auth_required);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
server:
  host: "127.0.0.1"
  port: 8080

providers:
  - id: "openai"
    provider: "openai"
    api_key: "sk-yaml"
  - id: "backup"
    provider: "groq"
    blacklist_models: ["whisper-large-v3"]

fallback:
  default_timeout_per_request_secs: 30
"#;

        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var("HOST", "0.0.0.0");
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("GROQ_API_KEY", "gsk-env");
        }

        let config = ServerConfig::from_file(&config_path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        let openai = config.providers.iter().find(|p| p.id == "openai").unwrap();
        assert_eq!(openai.config.api_key, "sk-yaml");
        // Missing api_key falls back to the kind's env key
        let backup = config.providers.iter().find(|p| p.id == "backup").unwrap();
        assert_eq!(backup.config.provider, ProviderKind::Groq);
        assert_eq!(backup.config.api_key, "gsk-env");
        assert!(!backup.config.is_model_allowed("whisper-large-v3"));
        // Env-only providers are kept
        assert!(config.providers.iter().any(|p| p.id == "groq"));
        assert_eq!(config.fallback.default_timeout_per_request_secs, 30);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let config_path = PathBuf::from("/nonexistent/config.yaml");
        let result = ServerConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    #[serial]
    fn test_from_file_rejects_duplicate_provider_ids() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
providers:
  - id: "p1"
    provider: "openai"
    api_key: "a"
  - id: "p1"
    provider: "groq"
    api_key: "b"
"#,
        )
        .unwrap();

        let err = ServerConfig::from_file(&config_path).unwrap_err();
        assert!(err.to_string().contains("Duplicate provider id"));
    }

    #[test]
    #[serial]
    fn test_from_file_with_auth() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
auth:
  api_secrets:
    - id: "client-a"
      secret: "secret-a"
"#,
        )
        .unwrap();

        let config = ServerConfig::from_file(&config_path).unwrap();
        assert!(config.auth_required);
        assert!(config.has_api_secret_auth());
        assert_eq!(config.auth_api_secrets[0].id, "client-a");
    }
}
