mod config;
mod logging;

use anyhow::{Context, Result};
use endpoint::conf::ClientConfig;
use endpoint::transport::HttpServerFactory;
use endpoint::{ClientHandle, EndpointRegistry, ServerHandle, ServiceUrl};
use tracing::{error, info, warn};

use crate::config::HostConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let bootstrap_logging = logging::bootstrap();

    info!("Starting shared endpoint host v{}", env!("CARGO_PKG_VERSION"));

    let config = HostConfig::load().context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    drop(bootstrap_logging);
    logging::install(&config.logging)?;

    info!(
        format = ?config.logging.format,
        output = ?config.logging.output,
        "Logging configured"
    );

    let registry = EndpointRegistry::new(
        HttpServerFactory::new(config.server.clone()).with_request_tracing(),
        config.client.clone(),
    );

    let exports = config.services.export_urls()?;
    let references = config.services.reference_urls()?;

    let servers = export_services(&registry, &exports).await?;
    let clients = reference_services(&registry, &references, &config.client).await;

    let snapshot = registry.snapshot().await;
    info!(
        servers = snapshot.servers.len(),
        clients = snapshot.clients.len(),
        "✓ Shared endpoints ready"
    );
    if let Ok(json) = serde_json::to_string(&snapshot) {
        info!("Endpoint table: {}", json);
    }

    let signal = wait_for_shutdown().await;
    warn!(signal, "Shutdown requested; releasing shared endpoints");

    // Release in reverse acquisition order; the last holder of each address
    // triggers the actual teardown
    for (url, server) in servers.iter().rev() {
        if let Err(e) = registry.release_server(server, url).await {
            error!("Failed to release server for {}: {}", url, e);
        }
    }
    for (url, client) in clients.iter().rev() {
        if let Err(e) = registry.release_client(client, url).await {
            error!("Failed to release client for {}: {}", url, e);
        }
    }

    let (servers_left, clients_left) = registry.shutdown().await;
    if servers_left + clients_left > 0 {
        warn!(
            servers = servers_left,
            clients = clients_left,
            "Endpoints still registered at shutdown were torn down"
        );
    }

    if let Ok(json) = serde_json::to_string(&registry.metrics()) {
        info!("Endpoint metrics: {}", json);
    }

    info!("Host shut down gracefully");
    Ok(())
}

/// Acquire a shared listener for every exported service. Any failure aborts
/// startup after releasing what was already acquired.
async fn export_services(
    registry: &EndpointRegistry,
    exports: &[ServiceUrl],
) -> Result<Vec<(ServiceUrl, ServerHandle)>> {
    let mut servers = Vec::with_capacity(exports.len());

    for url in exports {
        match registry.acquire_server(url).await {
            Ok(server) => {
                info!(
                    "✓ Exported {} on {} (endpoint {})",
                    url.service_key(),
                    server.local_addr(),
                    server.id()
                );
                servers.push((url.clone(), server));
            }
            Err(e) => {
                error!("✗ Failed to export {}: {}", url, e);
                for (acquired, server) in servers.iter().rev() {
                    if let Err(release_err) = registry.release_server(server, acquired).await {
                        error!(
                            "Failed to release server for {} during rollback: {}",
                            acquired, release_err
                        );
                    }
                }
                return Err(e).with_context(|| format!("Failed to export {}", url));
            }
        }
    }

    Ok(servers)
}

/// Acquire a shared client for every referenced service. Failures are logged
/// and the service is skipped.
async fn reference_services(
    registry: &EndpointRegistry,
    references: &[ServiceUrl],
    defaults: &ClientConfig,
) -> Vec<(ServiceUrl, ClientHandle)> {
    let mut clients = Vec::with_capacity(references.len());

    for url in references {
        match registry.acquire_client(url).await {
            Ok(client) => {
                let effective = ClientConfig::from_url(url, defaults);
                if client.config() != &effective {
                    warn!(
                        "{} shares the client for {} built with different settings",
                        url.service_key(),
                        url.address()
                    );
                }
                info!("✓ Referenced {} via {}", url.service_key(), client.base_url());
                clients.push((url.clone(), client));
            }
            Err(e) => {
                error!("✗ Failed to reference {}: {}", url, e);
            }
        }
    }

    clients
}

/// Resolves on Ctrl+C or SIGTERM with the name of the signal. A handler that
/// cannot be installed is logged and never fires.
async fn wait_for_shutdown() -> &'static str {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
