//! Configuration module for the relay server
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//!
//! # Example
//! ```rust,no_run
//! use voice_relay::config::ServerConfig;
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

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::core::relay::{
    DEFAULT_JOIN_URL_POINTER, DEFAULT_RESOLVER_PATH, RelaySettings, ResolverConfig,
};
use crate::utils::UrlValidationError;

mod env;
mod merge;
mod yaml;

pub use yaml::YamlConfig;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("{name} must be greater than zero")]
    ZeroValue { name: &'static str },

    #[error("Resolver base URL is required (set RESOLVER_BASE_URL or resolver.base_url)")]
    MissingResolverUrl,

    #[error("Invalid resolver base URL: {0}")]
    InvalidResolverUrl(#[from] UrlValidationError),

    #[error("TLS requires both a certificate path and a key path")]
    IncompleteTls,
}

/// TLS configuration for HTTPS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,

    // Session resolver
    pub resolver_base_url: String,
    pub resolver_path: String,
    pub resolver_api_key: Option<String>,
    pub resolver_join_url_pointer: String,
    pub resolve_timeout_ms: u64,

    // Relay
    pub flush_window_ms: u64,
    pub connect_timeout_ms: u64,
    /// Accept resolver targets on loopback/private addresses
    pub allow_private_targets: bool,
    /// Capacity of the per-session upstream command, upstream event and client response channels
    pub outbound_channel_capacity: usize,

    // Limits
    /// Global cap on concurrent sessions (unlimited when `None`)
    pub max_sessions: Option<usize>,
    pub max_sessions_per_ip: usize,
}

/// Zeroize the resolver API key when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.resolver_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Configuration with defaults for everything but the resolver URL.
    pub fn new(resolver_base_url: impl Into<String>) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            tls: None,
            resolver_base_url: resolver_base_url.into(),
            resolver_path: DEFAULT_RESOLVER_PATH.to_string(),
            resolver_api_key: None,
            resolver_join_url_pointer: DEFAULT_JOIN_URL_POINTER.to_string(),
            resolve_timeout_ms: 5000,
            flush_window_ms: 100,
            connect_timeout_ms: 5000,
            allow_private_targets: false,
            outbound_channel_capacity: 256,
            max_sessions: None,
            max_sessions_per_ip: 100,
        }
    }

    /// Load configuration from environment variables
    ///
    /// `.env` is loaded in `main` at startup, so its values are visible here as
    /// ordinary environment variables.
    ///
    /// # Errors
    /// Returns an error if a numeric or boolean variable does not parse, or the
    /// resolver URL is missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        merge::merge_config(env::EnvConfig::load()?, None)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Example
    /// ```rust,no_run
    /// use voice_relay::config::ServerConfig;
    /// use std::path::PathBuf;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let config_path = PathBuf::from("config.yaml");
    /// let config = ServerConfig::from_file(&config_path)?;
    /// println!("Server listening on {}", config.address());
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        merge::merge_config(env::EnvConfig::load()?, Some(yaml_config))
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Settings for the HTTP session resolver
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            base_url: self.resolver_base_url.clone(),
            path: self.resolver_path.clone(),
            api_key: self.resolver_api_key.clone(),
            join_url_pointer: self.resolver_join_url_pointer.clone(),
        }
    }

    /// Per-session relay settings
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            flush_window: Duration::from_millis(self.flush_window_ms),
            resolve_timeout: Duration::from_millis(self.resolve_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            allow_private_targets: self.allow_private_targets,
        }
    }
}
