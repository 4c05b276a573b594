//! Session resolver.
//!
//! Turns call identifiers into a connection target by posting
//! `{"from", "to", "callId"}` to the provisioning endpoint and reading the
//! join url out of the JSON response.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::base::{CallContext, ProvisioningReason, RelayError, RelayResult, SessionTarget};

/// Default JSON pointer to the join url in the provisioning response.
pub const DEFAULT_JOIN_URL_POINTER: &str = "/data/joinUrl";

/// Default path appended to the resolver base url.
pub const DEFAULT_RESOLVER_PATH: &str = "/calls";

/// Header carrying the resolver API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Resolves a call into the address of the voice service.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, context: &CallContext) -> RelayResult<SessionTarget>;
}

/// Settings for [`HttpSessionResolver`].
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Base url of the provisioning service
    pub base_url: String,
    /// Path appended to the base url
    pub path: String,
    /// Optional API key sent as `X-API-Key`
    pub api_key: Option<String>,
    /// JSON pointer to the join url in the response
    pub join_url_pointer: String,
}

impl ResolverConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: DEFAULT_RESOLVER_PATH.to_string(),
            api_key: None,
            join_url_pointer: DEFAULT_JOIN_URL_POINTER.to_string(),
        }
    }

    /// Full endpoint url.
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if self.path.is_empty() {
            base.to_string()
        } else if self.path.starts_with('/') {
            format!("{}{}", base, self.path)
        } else {
            format!("{}/{}", base, self.path)
        }
    }
}

/// Resolver backed by a single HTTP POST; no retries.
#[derive(Debug, Clone)]
pub struct HttpSessionResolver {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    join_url_pointer: String,
}

impl HttpSessionResolver {
    pub fn new(config: &ResolverConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: &ResolverConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint(),
            api_key: config.api_key.clone(),
            join_url_pointer: config.join_url_pointer.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SessionResolver for HttpSessionResolver {
    async fn resolve(&self, context: &CallContext) -> RelayResult<SessionTarget> {
        let mut request = self.client.post(&self.endpoint).json(context);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await.map_err(|e| {
            RelayError::ProvisioningFailure(ProvisioningReason::Transport(e.to_string()))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::ProvisioningFailure(ProvisioningReason::Status(
                status.as_u16(),
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            RelayError::ProvisioningFailure(ProvisioningReason::InvalidBody(e.to_string()))
        })?;

        let join_url = body
            .pointer(&self.join_url_pointer)
            .and_then(Value::as_str)
            .ok_or(RelayError::ProvisioningFailure(
                ProvisioningReason::MissingTarget,
            ))?;

        debug!(call_id = %context.call_id, "Resolved session target");
        SessionTarget::new(join_url)
    }
}
