//! Url — sharing key (`Address`), consumer identity (`ServiceKey`) and the
//! service URL both are derived from.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EndpointError, Result};

/// Default group used when a service URL carries no `group` parameter
pub const DEFAULT_GROUP: &str = "default_rpc";

/// Default version used when a service URL carries no `version` parameter
pub const DEFAULT_VERSION: &str = "1.0";

/// Normalized `host:port` pair. Two services with equal addresses share one
/// physical endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = normalize_host(&host.into());
        if host.is_empty() {
            return Err(EndpointError::InvalidAddress("host must not be empty".to_string()));
        }
        Ok(Self { host, port })
    }

    /// Parse `host:port` or `[v6]:port`.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (host, port) = input
            .rsplit_once(':')
            .ok_or_else(|| EndpointError::InvalidAddress(format!("missing port in '{}'", input)))?;

        // A bare IPv6 literal without brackets would split on its own colons
        if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
            return Err(EndpointError::InvalidAddress(format!(
                "IPv6 host must be bracketed in '{}'",
                input
            )));
        }

        let port = port
            .parse::<u16>()
            .map_err(|e| EndpointError::InvalidAddress(format!("invalid port in '{}': {}", input, e)))?;

        Self::new(host, port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

fn normalize_host(host: &str) -> String {
    host.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase()
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Address {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Identity of one logical service bound to an address. Opaque to the
/// registry, compared by equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceKey(String);

impl ServiceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ServiceKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Service descriptor: `protocol://host:port/path?key=value&...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUrl {
    protocol: String,
    address: Address,
    path: String,
    parameters: HashMap<String, String>,
}

impl ServiceUrl {
    pub fn new(protocol: impl Into<String>, address: Address, path: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            address,
            path: path.into().trim_matches('/').to_string(),
            parameters: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn parameter_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.parameter(name).unwrap_or(default)
    }

    /// Integer parameter; missing or unparseable values yield `default`.
    pub fn int_parameter<T: FromStr>(&self, name: &str, default: T) -> T {
        self.parameter(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn group(&self) -> &str {
        self.parameter_or("group", DEFAULT_GROUP)
    }

    pub fn version(&self) -> &str {
        self.parameter_or("version", DEFAULT_VERSION)
    }

    /// `protocol://host:port/group/path:version`
    pub fn service_key(&self) -> ServiceKey {
        ServiceKey(format!(
            "{}://{}/{}/{}:{}",
            self.protocol,
            self.address,
            self.group(),
            self.path,
            self.version()
        ))
    }

    /// Copy of this URL with an empty path. A shared listener serves many
    /// interfaces, so it is never bound to a single path.
    pub fn without_path(&self) -> Self {
        Self {
            path: String::new(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ServiceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.protocol, self.address, self.path)?;
        if !self.parameters.is_empty() {
            let mut pairs: Vec<_> = self.parameters.iter().collect();
            pairs.sort();
            let query = pairs
                .into_iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            write!(f, "?{}", query)?;
        }
        Ok(())
    }
}

impl FromStr for ServiceUrl {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (protocol, rest) = s
            .split_once("://")
            .ok_or_else(|| EndpointError::InvalidUrl(format!("missing protocol in '{}'", s)))?;
        if protocol.is_empty() {
            return Err(EndpointError::InvalidUrl(format!("empty protocol in '{}'", s)));
        }

        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, Some(query)),
            None => (rest, None),
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };

        let address = Address::parse(authority)
            .map_err(|e| EndpointError::InvalidUrl(format!("'{}': {}", s, e)))?;

        let mut url = ServiceUrl::new(protocol, address, path);
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
                if !name.is_empty() {
                    url.parameters.insert(name.to_string(), value.to_string());
                }
            }
        }

        Ok(url)
    }
}
