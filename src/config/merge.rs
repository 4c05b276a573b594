//! Merging of YAML and environment configuration.
//!
//! Priority: YAML > environment (including `.env`) > defaults.

use std::path::PathBuf;

use super::env::EnvConfig;
use super::yaml::YamlConfig;
use super::{ConfigError, ServerConfig, TlsConfig};
use crate::utils::validate_resolver_url;

pub(super) fn merge_config(
    env: EnvConfig,
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, ConfigError> {
    let yaml = yaml.unwrap_or_default();
    let server = yaml.server.unwrap_or_default();
    let tls = server.tls.unwrap_or_default();
    let resolver = yaml.resolver.unwrap_or_default();
    let relay = yaml.relay.unwrap_or_default();
    let limits = yaml.limits.unwrap_or_default();

    let resolver_base_url = resolver
        .base_url
        .or(env.resolver_base_url)
        .ok_or(ConfigError::MissingResolverUrl)?;
    validate_resolver_url(&resolver_base_url)?;

    let cert_path = tls.cert_path.or(env.tls_cert_path);
    let key_path = tls.key_path.or(env.tls_key_path);
    let tls = match (cert_path, key_path) {
        (Some(cert), Some(key)) => Some(TlsConfig {
            cert_path: PathBuf::from(cert),
            key_path: PathBuf::from(key),
        }),
        (None, None) => None,
        _ => return Err(ConfigError::IncompleteTls),
    };

    let mut config = ServerConfig::new(resolver_base_url);
    config.tls = tls;

    if let Some(host) = server.host.or(env.host) {
        config.host = host;
    }
    if let Some(port) = server.port.or(env.port) {
        config.port = port;
    }
    if let Some(path) = resolver.path.or(env.resolver_path) {
        config.resolver_path = path;
    }
    config.resolver_api_key = resolver.api_key.or(env.resolver_api_key);
    if let Some(pointer) = resolver
        .join_url_pointer
        .or(env.resolver_join_url_pointer)
    {
        config.resolver_join_url_pointer = pointer;
    }
    if let Some(ms) = resolver.timeout_ms.or(env.resolve_timeout_ms) {
        config.resolve_timeout_ms = non_zero("resolve_timeout_ms", ms)?;
    }
    if let Some(ms) = relay.flush_window_ms.or(env.flush_window_ms) {
        config.flush_window_ms = ms;
    }
    if let Some(ms) = relay.connect_timeout_ms.or(env.connect_timeout_ms) {
        config.connect_timeout_ms = non_zero("connect_timeout_ms", ms)?;
    }
    if let Some(allow) = relay.allow_private_targets.or(env.allow_private_targets) {
        config.allow_private_targets = allow;
    }
    if let Some(capacity) = relay
        .outbound_channel_capacity
        .or(env.outbound_channel_capacity)
    {
        config.outbound_channel_capacity = non_zero("outbound_channel_capacity", capacity)?;
    }
    config.max_sessions = limits.max_sessions.or(env.max_sessions);
    if let Some(per_ip) = limits.max_sessions_per_ip.or(env.max_sessions_per_ip) {
        config.max_sessions_per_ip = non_zero("max_sessions_per_ip", per_ip)?;
    }

    Ok(config)
}

fn non_zero<T>(name: &'static str, value: T) -> Result<T, ConfigError>
where
    T: PartialEq + Default,
{
    if value == T::default() {
        Err(ConfigError::ZeroValue { name })
    } else {
        Ok(value)
    }
}
