use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::handle::{Endpoint, EndpointFactory, EndpointKind, SharedEndpoint};
use super::metrics::{MetricsSnapshot, RegistryMetrics};
use crate::error::{EndpointError, Result};
use crate::url::{Address, ServiceKey};

/// What a release did to the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other services still hold the endpoint; it stays active
    Retained { remaining: usize },
    /// The last service released the endpoint and it was torn down
    TornDown,
    /// The handle was no longer registered under its address and was torn
    /// down directly, leaving the registry untouched
    Superseded,
}

/// Serializable view of one registry entry
#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot {
    pub address: String,
    pub endpoint_id: u64,
    pub created_at: DateTime<Utc>,
    pub service_keys: Vec<ServiceKey>,
}

/// A registered endpoint and the services that depend on it.
/// The key set is never empty while the entry exists.
struct RegistryEntry<H> {
    endpoint: Arc<SharedEndpoint<H>>,
    service_keys: HashSet<ServiceKey>,
}

/// Address-keyed registry of shared endpoints of one kind.
///
/// Lookup, construction, key-set mutation and teardown all run under a
/// single async mutex, so creation and destruction are linearized per
/// registry. Construction on a miss happens inside the lock: concurrent
/// acquirers of a cold address wait for the first one rather than racing to
/// build a second endpoint.
pub struct SharedRegistry<H: Endpoint> {
    kind: EndpointKind,
    entries: Mutex<HashMap<Address, RegistryEntry<H>>>,
    next_id: AtomicU64,
    metrics: RegistryMetrics,
}

impl<H: Endpoint> SharedRegistry<H> {
    pub fn new(kind: EndpointKind) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            metrics: RegistryMetrics::new(),
        }
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Get the endpoint registered for `address`, or build one with
    /// `factory`, and record `service_key` as a holder.
    pub async fn acquire<F>(
        &self,
        address: &Address,
        service_key: ServiceKey,
        factory: &F,
    ) -> Result<Arc<SharedEndpoint<H>>>
    where
        F: EndpointFactory<H> + ?Sized,
    {
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get_mut(address) {
            let added = entry.service_keys.insert(service_key.clone());
            self.metrics.endpoint_reused();
            debug!(
                kind = %self.kind,
                address = %address,
                service_key = %service_key,
                endpoint_id = entry.endpoint.id(),
                holders = entry.service_keys.len(),
                added,
                "Reusing shared endpoint"
            );
            return Ok(Arc::clone(&entry.endpoint));
        }

        let inner = match factory.create(address).await {
            Ok(inner) => inner,
            Err(e) => {
                self.metrics.construction_failed();
                warn!(kind = %self.kind, address = %address, "Failed to create endpoint: {}", e);
                return Err(e.into_construction(address));
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let endpoint = Arc::new(SharedEndpoint::new(id, address.clone(), inner));

        // Only started endpoints are ever registered
        if let Err(e) = endpoint.start() {
            self.metrics.construction_failed();
            warn!(kind = %self.kind, address = %address, "Failed to start endpoint: {}", e);
            if let Err(te) = endpoint.teardown().await {
                warn!(kind = %self.kind, address = %address, "Cleanup after failed start: {}", te);
            }
            return Err(e.into_construction(address));
        }

        entries.insert(
            address.clone(),
            RegistryEntry {
                endpoint: Arc::clone(&endpoint),
                service_keys: HashSet::from([service_key.clone()]),
            },
        );
        self.metrics.endpoint_created();

        info!(
            kind = %self.kind,
            address = %address,
            service_key = %service_key,
            endpoint_id = id,
            "Created shared endpoint"
        );
        Ok(endpoint)
    }

    /// Give back an endpoint obtained from [`acquire`](Self::acquire).
    ///
    /// The endpoint is torn down when `service_key` was its last holder. A
    /// handle that is no longer the one registered for its address is torn
    /// down directly without touching the registry.
    ///
    /// The entry is resolved from the address the handle was created for.
    /// A differing `address` argument is logged and otherwise ignored.
    pub async fn release(
        &self,
        endpoint: &Arc<SharedEndpoint<H>>,
        address: &Address,
        service_key: &ServiceKey,
    ) -> Result<ReleaseOutcome> {
        if endpoint.address() != address {
            warn!(
                kind = %self.kind,
                address = %address,
                endpoint_address = %endpoint.address(),
                service_key = %service_key,
                endpoint_id = endpoint.id(),
                "Release address does not match the endpoint; using the endpoint's own address"
            );
        }
        let address = endpoint.address();

        let mut entries = self.entries.lock().await;

        match entries.entry(address.clone()) {
            Entry::Occupied(mut occupied) if Arc::ptr_eq(&occupied.get().endpoint, endpoint) => {
                let entry = occupied.get_mut();
                if !entry.service_keys.remove(service_key) {
                    debug!(
                        kind = %self.kind,
                        address = %address,
                        service_key = %service_key,
                        "Released service was not registered"
                    );
                }
                self.metrics.endpoint_released();

                if !entry.service_keys.is_empty() {
                    let remaining = entry.service_keys.len();
                    debug!(
                        kind = %self.kind,
                        address = %address,
                        service_key = %service_key,
                        remaining,
                        "Shared endpoint still in use"
                    );
                    return Ok(ReleaseOutcome::Retained { remaining });
                }

                // Forget the entry first: a teardown failure must not leave
                // a dead endpoint registered.
                let removed = occupied.remove();
                self.tear_down(&removed.endpoint).await?;
                Ok(ReleaseOutcome::TornDown)
            }
            _ => {
                self.metrics.endpoint_superseded();
                debug!(
                    kind = %self.kind,
                    address = %address,
                    service_key = %service_key,
                    endpoint_id = endpoint.id(),
                    "Releasing superseded endpoint"
                );
                self.tear_down(endpoint).await?;
                Ok(ReleaseOutcome::Superseded)
            }
        }
    }

    /// Tear down every registered endpoint and empty the registry.
    /// Failures are logged and counted; the remaining endpoints are still
    /// torn down. Returns the number of endpoints removed.
    pub async fn shutdown(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let drained: Vec<_> = entries.drain().collect();
        let count = drained.len();

        let results = futures::future::join_all(
            drained
                .iter()
                .map(|(_, entry)| self.tear_down(&entry.endpoint)),
        )
        .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(kind = %self.kind, count, failed, "Shared endpoint registry shut down");
        count
    }

    async fn tear_down(&self, endpoint: &SharedEndpoint<H>) -> Result<()> {
        match endpoint.teardown().await {
            Ok(true) => {
                self.metrics.endpoint_torn_down();
                info!(
                    kind = %self.kind,
                    address = %endpoint.address(),
                    endpoint_id = endpoint.id(),
                    "Shared endpoint torn down"
                );
                Ok(())
            }
            Ok(false) => {
                debug!(
                    kind = %self.kind,
                    address = %endpoint.address(),
                    endpoint_id = endpoint.id(),
                    "Endpoint already torn down"
                );
                Ok(())
            }
            Err(e) => {
                self.metrics.teardown_failed();
                error!(
                    kind = %self.kind,
                    address = %endpoint.address(),
                    endpoint_id = endpoint.id(),
                    "Endpoint teardown failed: {}",
                    e
                );
                Err(EndpointError::Teardown {
                    address: endpoint.address().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// The endpoint currently registered for `address`
    pub async fn lookup(&self, address: &Address) -> Option<Arc<SharedEndpoint<H>>> {
        self.entries
            .lock()
            .await
            .get(address)
            .map(|entry| Arc::clone(&entry.endpoint))
    }

    /// Services currently holding the endpoint for `address`, sorted
    pub async fn service_keys(&self, address: &Address) -> Option<Vec<ServiceKey>> {
        self.entries.lock().await.get(address).map(|entry| {
            let mut keys: Vec<_> = entry.service_keys.iter().cloned().collect();
            keys.sort();
            keys
        })
    }

    pub async fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<_> = self.entries.lock().await.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<EntrySnapshot> {
        let entries = self.entries.lock().await;
        let mut snapshot: Vec<_> = entries
            .iter()
            .map(|(address, entry)| {
                let mut service_keys: Vec<_> = entry.service_keys.iter().cloned().collect();
                service_keys.sort();
                EntrySnapshot {
                    address: address.to_string(),
                    endpoint_id: entry.endpoint.id(),
                    created_at: entry.endpoint.created_at(),
                    service_keys,
                }
            })
            .collect();
        snapshot.sort_by(|a, b| a.address.cmp(&b.address));
        snapshot
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
