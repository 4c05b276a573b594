//! Environment variable loading.
//!
//! Every value is optional here; defaults are applied during merging.

use std::env;
use std::str::FromStr;

use super::ConfigError;

/// Raw values read from the process environment.
#[derive(Debug, Clone, Default)]
pub(super) struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub resolver_base_url: Option<String>,
    pub resolver_path: Option<String>,
    pub resolver_api_key: Option<String>,
    pub resolver_join_url_pointer: Option<String>,
    pub resolve_timeout_ms: Option<u64>,
    pub flush_window_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub allow_private_targets: Option<bool>,
    pub outbound_channel_capacity: Option<usize>,
    pub max_sessions: Option<usize>,
    pub max_sessions_per_ip: Option<usize>,
}

impl EnvConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            host: string_var("HOST"),
            port: parsed_var("PORT")?,
            tls_cert_path: string_var("TLS_CERT_PATH"),
            tls_key_path: string_var("TLS_KEY_PATH"),
            resolver_base_url: string_var("RESOLVER_BASE_URL"),
            resolver_path: string_var("RESOLVER_PATH"),
            resolver_api_key: string_var("RESOLVER_API_KEY"),
            resolver_join_url_pointer: string_var("RESOLVER_JOIN_URL_POINTER"),
            resolve_timeout_ms: parsed_var("RESOLVE_TIMEOUT_MS")?,
            flush_window_ms: parsed_var("FLUSH_WINDOW_MS")?,
            connect_timeout_ms: parsed_var("CONNECT_TIMEOUT_MS")?,
            allow_private_targets: bool_var("ALLOW_PRIVATE_TARGETS")?,
            outbound_channel_capacity: parsed_var("OUTBOUND_CHANNEL_CAPACITY")?,
            max_sessions: parsed_var("MAX_SESSIONS")?,
            max_sessions_per_ip: parsed_var("MAX_SESSIONS_PER_IP")?,
        })
    }
}

/// Non-empty value of `name`, trimmed.
fn string_var(name: &'static str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match string_var(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(None),
    }
}

fn bool_var(name: &'static str) -> Result<Option<bool>, ConfigError> {
    match string_var(name) {
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue { name, value }),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn cleanup() {
        unsafe {
            env::remove_var("PORT");
            env::remove_var("HOST");
            env::remove_var("ALLOW_PRIVATE_TARGETS");
            env::remove_var("FLUSH_WINDOW_MS");
        }
    }

    #[test]
    #[serial]
    fn test_unset_vars_are_none() {
        cleanup();
        let config = EnvConfig::load().unwrap();
        assert!(config.port.is_none());
        assert!(config.host.is_none());
        assert!(config.allow_private_targets.is_none());
    }

    #[test]
    #[serial]
    fn test_blank_value_is_treated_as_unset() {
        cleanup();
        unsafe {
            env::set_var("HOST", "   ");
        }
        let config = EnvConfig::load().unwrap();
        assert!(config.host.is_none());
        cleanup();
    }

    #[test]
    #[serial]
    fn test_invalid_number_is_rejected() {
        cleanup();
        unsafe {
            env::set_var("FLUSH_WINDOW_MS", "soon");
        }
        let err = EnvConfig::load().unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for FLUSH_WINDOW_MS: soon");
        cleanup();
    }

    #[test]
    #[serial]
    fn test_bool_spellings() {
        cleanup();
        for (raw, expected) in [("true", true), ("YES", true), ("0", false), ("off", false)] {
            unsafe {
                env::set_var("ALLOW_PRIVATE_TARGETS", raw);
            }
            let config = EnvConfig::load().unwrap();
            assert_eq!(config.allow_private_targets, Some(expected), "{raw}");
        }

        unsafe {
            env::set_var("ALLOW_PRIVATE_TARGETS", "maybe");
        }
        assert!(EnvConfig::load().is_err());
        cleanup();
    }
}
