use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present here
/// override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///   tls:
///     cert_path: "/etc/relay/cert.pem"
///     key_path: "/etc/relay/key.pem"
///
/// resolver:
///   base_url: "https://voice.example.com/api"
///   path: "/calls"
///   api_key: "your-api-key"
///   join_url_pointer: "/data/joinUrl"
///   timeout_ms: 5000
///
/// relay:
///   flush_window_ms: 100
///   connect_timeout_ms: 5000
///   allow_private_targets: false
///   outbound_channel_capacity: 256
///
/// limits:
///   max_sessions: 1000
///   max_sessions_per_ip: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub resolver: Option<ResolverYaml>,
    pub relay: Option<RelayYaml>,
    pub limits: Option<LimitsYaml>,
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
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Session resolver configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ResolverYaml {
    pub base_url: Option<String>,
    pub path: Option<String>,
    pub api_key: Option<String>,
    pub join_url_pointer: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Relay tuning from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RelayYaml {
    pub flush_window_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub allow_private_targets: Option<bool>,
    pub outbound_channel_capacity: Option<usize>,
}

/// Session limits from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LimitsYaml {
    pub max_sessions: Option<usize>,
    pub max_sessions_per_ip: Option<usize>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080
  tls:
    cert_path: "/tmp/cert.pem"
    key_path: "/tmp/key.pem"

resolver:
  base_url: "https://voice.example.com"
  path: "/v2/calls"
  api_key: "secret"
  join_url_pointer: "/joinUrl"
  timeout_ms: 2500

relay:
  flush_window_ms: 50
  connect_timeout_ms: 3000
  allow_private_targets: true
  outbound_channel_capacity: 64

limits:
  max_sessions: 10
  max_sessions_per_ip: 2
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.host, Some("127.0.0.1".to_string()));
        assert_eq!(server.port, Some(8080));
        let tls = server.tls.unwrap();
        assert_eq!(tls.cert_path, Some("/tmp/cert.pem".to_string()));
        assert_eq!(tls.key_path, Some("/tmp/key.pem".to_string()));

        let resolver = config.resolver.unwrap();
        assert_eq!(
            resolver.base_url,
            Some("https://voice.example.com".to_string())
        );
        assert_eq!(resolver.path, Some("/v2/calls".to_string()));
        assert_eq!(resolver.api_key, Some("secret".to_string()));
        assert_eq!(resolver.join_url_pointer, Some("/joinUrl".to_string()));
        assert_eq!(resolver.timeout_ms, Some(2500));

        let relay = config.relay.unwrap();
        assert_eq!(relay.flush_window_ms, Some(50));
        assert_eq!(relay.connect_timeout_ms, Some(3000));
        assert_eq!(relay.allow_private_targets, Some(true));
        assert_eq!(relay.outbound_channel_capacity, Some(64));

        let limits = config.limits.unwrap();
        assert_eq!(limits.max_sessions, Some(10));
        assert_eq!(limits.max_sessions_per_ip, Some(2));
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
resolver:
  base_url: "https://voice.example.com"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        assert!(config.server.is_none());
        assert!(config.relay.is_none());
        let resolver = config.resolver.unwrap();
        assert!(resolver.api_key.is_none());
        assert!(resolver.timeout_ms.is_none());
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.server.is_none());
        assert!(config.resolver.is_none());
        assert!(config.limits.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        fs::write(
            &config_path,
            "server:\n  host: \"localhost\"\n  port: 3000\n",
        )
        .unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        let server = config.server.unwrap();
        assert_eq!(server.host, Some("localhost".to_string()));
        assert_eq!(server.port, Some(3000));
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/config.yaml");
        let result = YamlConfig::from_file(&path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }
}
