//! Server — shared HTTP listener served by axum with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::conf::ServerConfig;
use crate::error::{EndpointError, Result};
use crate::registry::{BoxFuture, Endpoint, EndpointFactory};
use crate::url::{Address, ServiceUrl};

/// Builds the router served by a new listener
pub type RouterBuilder = Arc<dyn Fn(&ServiceUrl) -> Router + Send + Sync>;

/// Post-construction transform applied to every new router, in registration
/// order (error mapping, injected state, middleware).
pub type RouterHook = Arc<dyn Fn(Router) -> Router + Send + Sync>;

enum ServerState {
    Bound {
        listener: TcpListener,
        router: Router,
    },
    Running {
        shutdown_tx: oneshot::Sender<()>,
        task: JoinHandle<std::io::Result<()>>,
    },
    Stopped,
}

/// A bound listener. Serving begins on [`start`](HttpServer::start).
pub struct HttpServer {
    local_addr: SocketAddr,
    url: ServiceUrl,
    shutdown_grace: Duration,
    state: Mutex<ServerState>,
}

impl HttpServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The (path-less) URL this listener was built for
    pub fn url(&self) -> &ServiceUrl {
        &self.url
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), ServerState::Running { .. })
    }

    /// Spawn the serve loop. Starting a running server is a no-op; a stopped
    /// server cannot be restarted.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, ServerState::Stopped) {
            ServerState::Bound { listener, router } => {
                let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
                let task = tokio::spawn(async move {
                    axum::serve(listener, router)
                        .with_graceful_shutdown(async move {
                            let _ = shutdown_rx.await;
                        })
                        .await
                });
                *state = ServerState::Running { shutdown_tx, task };
                info!("✓ Shared server listening on {}", self.local_addr);
                Ok(())
            }
            running @ ServerState::Running { .. } => {
                *state = running;
                Ok(())
            }
            ServerState::Stopped => Err(EndpointError::Closed),
        }
    }

    /// Signal graceful shutdown and wait up to the grace period for the serve
    /// loop to drain; after that the loop is aborted.
    pub async fn stop(&self) -> Result<()> {
        // Take the state out so the lock is not held across the await
        let previous = std::mem::replace(&mut *self.state.lock(), ServerState::Stopped);

        match previous {
            ServerState::Running { shutdown_tx, mut task } => {
                let _ = shutdown_tx.send(());
                match tokio::time::timeout(self.shutdown_grace, &mut task).await {
                    Ok(joined) => joined??,
                    Err(_) => {
                        warn!(
                            "Server on {} did not drain within {}ms, aborting",
                            self.local_addr,
                            self.shutdown_grace.as_millis()
                        );
                        task.abort();
                    }
                }
                info!("Shared server on {} stopped", self.local_addr);
                Ok(())
            }
            ServerState::Bound { .. } => {
                debug!("Server on {} stopped before it started", self.local_addr);
                Ok(())
            }
            ServerState::Stopped => Ok(()),
        }
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        if let ServerState::Running { task, .. } = self.state.get_mut() {
            task.abort();
        }
    }
}

impl Endpoint for HttpServer {
    fn start(&self) -> Result<()> {
        HttpServer::start(self)
    }

    fn teardown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.stop())
    }
}

fn default_router(_url: &ServiceUrl) -> Router {
    Router::new().route("/health", get(|| async { "ok" }))
}

/// Builds [`HttpServer`]s: bind, build the router, apply hooks.
#[derive(Clone)]
pub struct HttpServerFactory {
    config: ServerConfig,
    router: RouterBuilder,
    hooks: Vec<RouterHook>,
}

impl HttpServerFactory {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            router: Arc::new(default_router),
            hooks: Vec::new(),
        }
    }

    pub fn with_router<F>(mut self, router: F) -> Self
    where
        F: Fn(&ServiceUrl) -> Router + Send + Sync + 'static,
    {
        self.router = Arc::new(router);
        self
    }

    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(Router) -> Router + Send + Sync + 'static,
    {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Log every request through `tower_http::trace`
    pub fn with_request_tracing(self) -> Self {
        self.with_hook(|router| router.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http())))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Factory bound to one service URL, for use with the registry
    pub fn for_url(&self, url: &ServiceUrl) -> ServerBinding<'_> {
        ServerBinding {
            factory: self,
            url: url.without_path(),
        }
    }

    /// Bind `address` and prepare the router. The returned server is not
    /// serving yet.
    pub async fn build(&self, url: &ServiceUrl, address: &Address) -> Result<HttpServer> {
        let router = self
            .hooks
            .iter()
            .fold((self.router)(url), |router, hook| hook(router));

        let listener = TcpListener::bind(address.to_string()).await?;
        let local_addr = listener.local_addr()?;
        debug!("Bound shared listener for {} on {}", address, local_addr);

        Ok(HttpServer {
            local_addr,
            url: url.clone(),
            shutdown_grace: self.config.shutdown_grace(),
            state: Mutex::new(ServerState::Bound { listener, router }),
        })
    }
}

/// [`HttpServerFactory`] paired with the URL that triggered construction
pub struct ServerBinding<'f> {
    factory: &'f HttpServerFactory,
    url: ServiceUrl,
}

impl EndpointFactory<HttpServer> for ServerBinding<'_> {
    fn create<'a>(&'a self, address: &'a Address) -> BoxFuture<'a, Result<HttpServer>> {
        Box::pin(self.factory.build(&self.url, address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn local_url() -> ServiceUrl {
        "restful://127.0.0.1:0/com.example.Echo".parse().unwrap()
    }

    async fn get_health(addr: SocketAddr) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_build_binds_but_does_not_serve() {
        let factory = HttpServerFactory::new(ServerConfig::default());
        let url = local_url();
        let server = factory.build(&url, url.address()).await.unwrap();

        assert_ne!(server.local_addr().port(), 0);
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_start_serves_and_stop_releases_port() {
        let factory = HttpServerFactory::new(ServerConfig::default()).with_request_tracing();
        let url = local_url();
        let server = factory.build(&url, url.address()).await.unwrap();
        let addr = server.local_addr();

        server.start().unwrap();
        assert!(server.is_running());

        let response = get_health(addr).await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("ok"));

        server.stop().await.unwrap();
        assert!(!server.is_running());

        // The port is free again once the listener is gone
        TcpListener::bind(addr).await.unwrap();
    }

    #[tokio::test]
    async fn test_hooks_apply_in_order() {
        let factory = HttpServerFactory::new(ServerConfig::default())
            .with_router(|_| Router::new())
            .with_hook(|router| router.route("/first", get(|| async { "first" })))
            .with_hook(|router| router.route("/health", get(|| async { "hooked" })));
        let url = local_url();
        let server = factory.build(&url, url.address()).await.unwrap();
        server.start().unwrap();

        let response = get_health(server.local_addr()).await;
        assert!(response.ends_with("hooked"));

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stopped_server_cannot_restart() {
        let factory = HttpServerFactory::new(ServerConfig::default());
        let url = local_url();
        let server = factory.build(&url, url.address()).await.unwrap();

        server.start().unwrap();
        server.stop().await.unwrap();
        server.stop().await.unwrap();
        assert!(matches!(server.start(), Err(EndpointError::Closed)));
    }

    #[tokio::test]
    async fn test_binding_strips_path() {
        let factory = HttpServerFactory::new(ServerConfig::default());
        let url = local_url();
        let binding = factory.for_url(&url);
        let server = binding.create(url.address()).await.unwrap();
        assert_eq!(server.url().path(), "");
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();
        let address = Address::new("127.0.0.1", port).unwrap();

        let factory = HttpServerFactory::new(ServerConfig::default());
        let url = ServiceUrl::new("restful", address.clone(), "svc");
        assert!(factory.build(&url, &address).await.is_err());
    }
}
