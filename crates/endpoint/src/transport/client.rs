//! Client — shared gRPC channel toward one address.

use parking_lot::Mutex;
use tonic::transport::Channel;
use tracing::debug;

use crate::conf::ClientConfig;
use crate::error::{EndpointError, Result};
use crate::registry::{BoxFuture, Endpoint, EndpointFactory};
use crate::url::Address;

/// A lazily connected channel plus the base URL requests are issued under.
pub struct RpcClient {
    base_url: String,
    config: ClientConfig,
    channel: Mutex<Option<Channel>>,
}

impl RpcClient {
    /// `http://host:port{base_path}`
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Settings the channel was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// A handle on the shared channel.
    /// Channels are cheap to clone (Arc internally).
    pub fn channel(&self) -> Result<Channel> {
        self.channel.lock().clone().ok_or(EndpointError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.channel.lock().is_none()
    }

    /// Drop the channel. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        self.channel.lock().take().is_some()
    }
}

impl Endpoint for RpcClient {
    fn teardown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.close() {
                debug!("Closed shared client for {}", self.base_url);
            }
            Ok(())
        })
    }
}

/// Builds [`RpcClient`]s from one [`ClientConfig`]
#[derive(Debug, Clone)]
pub struct RpcClientFactory {
    config: ClientConfig,
}

impl RpcClientFactory {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Configure the channel. Connection happens on first use, so building
    /// never blocks on the peer.
    pub fn build(&self, address: &Address) -> Result<RpcClient> {
        self.config.validate().map_err(EndpointError::InvalidConfig)?;

        let endpoint = Channel::from_shared(format!("http://{}", address))
            .map_err(|e| EndpointError::InvalidAddress(format!("{}: {}", address, e)))?
            .connect_timeout(self.config.connect_timeout())
            .timeout(self.config.request_timeout())
            .tcp_nodelay(true)
            .tcp_keepalive(self.config.keep_alive())
            .concurrency_limit(self.config.max_connections);

        let channel = endpoint.connect_lazy();
        let base_url = format!("http://{}{}", address, self.config.base_path);
        debug!(
            "Configured shared client for {} (max_connections={}, connect_timeout={}ms, request_timeout={}ms)",
            base_url,
            self.config.max_connections,
            self.config.connect_timeout_ms,
            self.config.request_timeout_ms
        );

        Ok(RpcClient {
            base_url,
            config: self.config.clone(),
            channel: Mutex::new(Some(channel)),
        })
    }
}

impl EndpointFactory<RpcClient> for RpcClientFactory {
    fn create<'a>(&'a self, address: &'a Address) -> BoxFuture<'a, Result<RpcClient>> {
        Box::pin(async move { self.build(address) })
    }
}
