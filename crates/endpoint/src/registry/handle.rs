//! Handle — the collaborator contract for shared endpoints and the
//! registry-owned wrapper handed out to callers.

use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::url::Address;

/// Boxed future returned by the object-safe collaborator traits
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A physical endpoint (listener or client pool) that can be shared by many
/// logical services.
///
/// Implementations must be `Send + Sync` so they can live inside
/// `Arc<SharedEndpoint<_>>`.
pub trait Endpoint: Send + Sync + 'static {
    /// Activate the endpoint. Called once by the registry after construction
    /// and before the endpoint becomes visible to other acquirers.
    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Stop / close the underlying resource.
    fn teardown(&self) -> BoxFuture<'_, Result<()>>;
}

/// Builds a new endpoint for an address. Invoked by the registry at most once
/// per creation event, while the registry lock is held.
pub trait EndpointFactory<H: Endpoint>: Send + Sync {
    fn create<'a>(&'a self, address: &'a Address) -> BoxFuture<'a, Result<H>>;
}

/// Which registry a handle belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Server,
    Client,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Server => f.write_str("server"),
            EndpointKind::Client => f.write_str("client"),
        }
    }
}

/// Lifecycle of a shared endpoint. `TornDown` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointState {
    Active,
    TornDown,
}

/// An endpoint as handed out by the registry.
///
/// Identity is the allocation: two holders share the same endpoint iff
/// `Arc::ptr_eq` holds on their handles.
pub struct SharedEndpoint<H> {
    id: u64,
    address: Address,
    created_at: DateTime<Utc>,
    torn_down: AtomicBool,
    inner: H,
}

impl<H: Endpoint> SharedEndpoint<H> {
    pub(crate) fn new(id: u64, address: Address, inner: H) -> Self {
        Self {
            id,
            address,
            created_at: Utc::now(),
            torn_down: AtomicBool::new(false),
            inner,
        }
    }

    /// Run the inner teardown at most once.
    /// Returns `Ok(false)` if this instance was already torn down.
    pub(crate) async fn teardown(&self) -> Result<bool> {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        self.inner.teardown().await.map(|_| true)
    }
}

impl<H> SharedEndpoint<H> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> EndpointState {
        if self.torn_down.load(Ordering::Acquire) {
            EndpointState::TornDown
        } else {
            EndpointState::Active
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == EndpointState::Active
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

impl<H> Deref for SharedEndpoint<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.inner
    }
}

impl<H> fmt::Debug for SharedEndpoint<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEndpoint")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}
