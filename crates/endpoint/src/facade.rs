//! Facade — URL-level entry point used by protocol adapters.
//!
//! Wraps one server registry and one client registry. The two are
//! independent lock domains: acquiring a server and a client for the same
//! address never coordinates.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::conf::ClientConfig;
use crate::error::Result;
use crate::registry::{
    EndpointKind, EntrySnapshot, MetricsSnapshot, ReleaseOutcome, SharedEndpoint, SharedRegistry,
};
use crate::transport::{HttpServer, HttpServerFactory, RpcClient, RpcClientFactory};
use crate::url::ServiceUrl;

pub type ServerHandle = Arc<SharedEndpoint<HttpServer>>;
pub type ClientHandle = Arc<SharedEndpoint<RpcClient>>;

/// Metrics for both registries
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EndpointMetrics {
    pub servers: MetricsSnapshot,
    pub clients: MetricsSnapshot,
}

/// Entries of both registries
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub servers: Vec<EntrySnapshot>,
    pub clients: Vec<EntrySnapshot>,
}

/// Shared servers and clients, keyed by the `host:port` of a service URL
pub struct EndpointRegistry {
    servers: SharedRegistry<HttpServer>,
    clients: SharedRegistry<RpcClient>,
    server_factory: HttpServerFactory,
    client_defaults: ClientConfig,
}

impl EndpointRegistry {
    pub fn new(server_factory: HttpServerFactory, client_defaults: ClientConfig) -> Self {
        Self {
            servers: SharedRegistry::new(EndpointKind::Server),
            clients: SharedRegistry::new(EndpointKind::Client),
            server_factory,
            client_defaults,
        }
    }

    /// Listener for `url`'s address, started on first use
    pub async fn acquire_server(&self, url: &ServiceUrl) -> Result<ServerHandle> {
        info!(url = %url, "Acquire shared server");
        let binding = self.server_factory.for_url(url);
        self.servers
            .acquire(url.address(), url.service_key(), &binding)
            .await
    }

    pub async fn release_server(&self, server: &ServerHandle, url: &ServiceUrl) -> Result<ReleaseOutcome> {
        self.servers
            .release(server, url.address(), &url.service_key())
            .await
    }

    /// Client for `url`'s address. URL parameters only shape the client when
    /// this call creates it; later services reuse it as built.
    pub async fn acquire_client(&self, url: &ServiceUrl) -> Result<ClientHandle> {
        info!(url = %url, "Acquire shared client");
        let factory = RpcClientFactory::new(ClientConfig::from_url(url, &self.client_defaults));
        self.clients
            .acquire(url.address(), url.service_key(), &factory)
            .await
    }

    pub async fn release_client(&self, client: &ClientHandle, url: &ServiceUrl) -> Result<ReleaseOutcome> {
        self.clients
            .release(client, url.address(), &url.service_key())
            .await
    }

    pub fn servers(&self) -> &SharedRegistry<HttpServer> {
        &self.servers
    }

    pub fn clients(&self) -> &SharedRegistry<RpcClient> {
        &self.clients
    }

    pub fn metrics(&self) -> EndpointMetrics {
        EndpointMetrics {
            servers: self.servers.metrics(),
            clients: self.clients.metrics(),
        }
    }

    pub async fn snapshot(&self) -> EndpointSnapshot {
        let (servers, clients) = tokio::join!(self.servers.snapshot(), self.clients.snapshot());
        EndpointSnapshot { servers, clients }
    }

    /// Tear down every shared server and client.
    /// Returns `(servers, clients)` removed.
    pub async fn shutdown(&self) -> (usize, usize) {
        tokio::join!(self.servers.shutdown(), self.clients.shutdown())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::ServerConfig;
    use tokio::net::TcpListener;

    fn registry() -> EndpointRegistry {
        EndpointRegistry::new(
            HttpServerFactory::new(ServerConfig::default()),
            ClientConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_services_share_one_server() {
        let registry = registry();
        let svc_a: ServiceUrl = "restful://127.0.0.1:0/svcA".parse().unwrap();
        let svc_b: ServiceUrl = "restful://127.0.0.1:0/svcB".parse().unwrap();

        let a = registry.acquire_server(&svc_a).await.unwrap();
        let b = registry.acquire_server(&svc_b).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_running());
        assert_eq!(a.url().path(), "");

        let bound = a.local_addr();
        assert_eq!(
            registry.release_server(&a, &svc_a).await.unwrap(),
            ReleaseOutcome::Retained { remaining: 1 }
        );
        assert!(a.is_running());

        assert_eq!(
            registry.release_server(&b, &svc_b).await.unwrap(),
            ReleaseOutcome::TornDown
        );
        assert!(!b.is_running());
        assert!(registry.servers().is_empty().await);
        TcpListener::bind(bound).await.unwrap();
    }

    #[tokio::test]
    async fn test_client_built_from_first_url() {
        let registry = registry();
        let svc_a: ServiceUrl = "restful://10.0.0.1:8080/svcA?contextpath=api&maxClientConnection=4"
            .parse()
            .unwrap();
        let svc_b: ServiceUrl = "restful://10.0.0.1:8080/svcB?maxClientConnection=64".parse().unwrap();

        let a = registry.acquire_client(&svc_a).await.unwrap();
        let b = registry.acquire_client(&svc_b).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.base_url(), "http://10.0.0.1:8080/api");
        assert_eq!(b.config().max_connections, 4);

        registry.release_client(&a, &svc_a).await.unwrap();
        registry.release_client(&b, &svc_b).await.unwrap();
        assert!(a.is_closed());
        assert_eq!(registry.metrics().clients.torn_down, 1);
    }

    #[tokio::test]
    async fn test_server_and_client_domains_are_independent() {
        let registry = registry();
        let url: ServiceUrl = "restful://127.0.0.1:0/svc".parse().unwrap();

        let server = registry.acquire_server(&url).await.unwrap();
        let client = registry.acquire_client(&url).await.unwrap();

        registry.release_client(&client, &url).await.unwrap();
        assert!(server.is_running());
        assert_eq!(registry.servers().len().await, 1);
        assert!(registry.clients().is_empty().await);

        registry.release_server(&server, &url).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_clears_both_registries() {
        let registry = registry();
        let url: ServiceUrl = "restful://127.0.0.1:0/svc".parse().unwrap();
        let remote: ServiceUrl = "restful://10.0.0.9:9000/svc".parse().unwrap();

        let server = registry.acquire_server(&url).await.unwrap();
        let client = registry.acquire_client(&remote).await.unwrap();

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.servers.len(), 1);
        assert_eq!(snapshot.clients.len(), 1);

        assert_eq!(registry.shutdown().await, (1, 1));
        assert!(!server.is_running());
        assert!(client.is_closed());
    }
}
