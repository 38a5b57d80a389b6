//! Fake — test doubles for the endpoint collaborator traits.
//!
//! [`FakeFactory`] builds in-memory [`FakeEndpoint`]s and counts how many
//! were created and torn down, so registry behavior can be asserted without
//! binding sockets or dialing peers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{EndpointError, Result};
use crate::registry::{BoxFuture, Endpoint, EndpointFactory};
use crate::url::Address;

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    teardowns: AtomicUsize,
}

/// An in-memory endpoint
pub struct FakeEndpoint {
    address: Address,
    serial: usize,
    started: AtomicBool,
    fail_start: bool,
    fail_teardown: bool,
    counters: Arc<Counters>,
}

impl FakeEndpoint {
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// 1-based creation order within the owning factory
    pub fn serial(&self) -> usize {
        self.serial
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

impl Endpoint for FakeEndpoint {
    fn start(&self) -> Result<()> {
        if self.fail_start {
            return Err(EndpointError::InvalidConfig("fake start failure".to_string()));
        }
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn teardown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.counters.teardowns.fetch_add(1, Ordering::SeqCst);
            self.started.store(false, Ordering::Release);
            if self.fail_teardown {
                return Err(EndpointError::Io(std::io::Error::other("fake teardown failure")));
            }
            Ok(())
        })
    }
}

/// A deterministic endpoint factory. Clones share counters.
#[derive(Clone, Default)]
pub struct FakeFactory {
    counters: Arc<Counters>,
    fail_create: Option<String>,
    fail_start: bool,
    fail_teardown: bool,
    delay: Option<Duration>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory whose `create` always fails with `reason`
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_create: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn fail_teardown(mut self) -> Self {
        self.fail_teardown = true;
        self
    }

    pub fn succeed_teardown(mut self) -> Self {
        self.fail_teardown = false;
        self
    }

    /// Sleep inside `create`, widening the window for racing acquirers
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of successful `create` calls
    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    /// Number of inner teardowns across all endpoints built by this factory
    pub fn teardowns(&self) -> usize {
        self.counters.teardowns.load(Ordering::SeqCst)
    }
}

impl EndpointFactory<FakeEndpoint> for FakeFactory {
    fn create<'a>(&'a self, address: &'a Address) -> BoxFuture<'a, Result<FakeEndpoint>> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(reason) = &self.fail_create {
                return Err(EndpointError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    reason.clone(),
                )));
            }
            let serial = self.counters.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(FakeEndpoint {
                address: address.clone(),
                serial,
                started: AtomicBool::new(false),
                fail_start: self.fail_start,
                fail_teardown: self.fail_teardown,
                counters: Arc::clone(&self.counters),
            })
        })
    }
}
