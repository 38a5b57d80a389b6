//! Conf — binding configuration consumed by the endpoint factories.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::url::ServiceUrl;

/// URL parameter overriding [`ClientConfig::max_connections`]
pub const PARAM_MAX_CLIENT_CONNECTION: &str = "maxClientConnection";
/// URL parameter overriding [`ClientConfig::connect_timeout_ms`]
pub const PARAM_CONNECT_TIMEOUT: &str = "connectTimeout";
/// URL parameter overriding [`ClientConfig::request_timeout_ms`]
pub const PARAM_REQUEST_TIMEOUT: &str = "requestTimeout";
/// URL parameter overriding [`ClientConfig::base_path`]
pub const PARAM_CONTEXT_PATH: &str = "contextpath";

/// Outbound client pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Caps in-flight requests over the shared channel
    pub max_connections: usize,
    pub connect_timeout_ms: u64,
    /// Bounds a single request, including the socket read
    pub request_timeout_ms: u64,
    /// TCP keep-alive interval; 0 disables keep-alive
    pub keep_alive_secs: u64,
    /// URL path prefix, always starting with "/"
    pub base_path: String,
}

impl ClientConfig {
    /// Resolve the effective config for `url`.
    /// Priority: URL parameters > `defaults`
    pub fn from_url(url: &ServiceUrl, defaults: &ClientConfig) -> Self {
        Self {
            max_connections: url.int_parameter(PARAM_MAX_CLIENT_CONNECTION, defaults.max_connections),
            connect_timeout_ms: url.int_parameter(PARAM_CONNECT_TIMEOUT, defaults.connect_timeout_ms),
            request_timeout_ms: url.int_parameter(PARAM_REQUEST_TIMEOUT, defaults.request_timeout_ms),
            keep_alive_secs: defaults.keep_alive_secs,
            base_path: normalize_base_path(url.parameter_or(PARAM_CONTEXT_PATH, &defaults.base_path)),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        (self.keep_alive_secs > 0).then(|| Duration::from_secs(self.keep_alive_secs))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("client.max_connections must be > 0".to_string());
        }
        if self.connect_timeout_ms == 0 {
            return Err("client.connect_timeout_ms must be > 0".to_string());
        }
        if self.request_timeout_ms == 0 {
            return Err("client.request_timeout_ms must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connect_timeout_ms: 1000,
            request_timeout_ms: 200,
            keep_alive_secs: 60,
            base_path: "/".to_string(),
        }
    }
}

/// Ensure a base path starts with "/".
pub fn normalize_base_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Shared listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// How long `stop()` waits for in-flight requests before aborting
    pub shutdown_grace_ms: u64,
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.shutdown_grace_ms == 0 {
            return Err("server.shutdown_grace_ms must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: 5000,
        }
    }
}
