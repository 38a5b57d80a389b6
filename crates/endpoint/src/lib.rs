//! Shared endpoints for a multi-tenant RPC runtime.
//!
//! Many logical services may bind the same `host:port`. The registry keeps
//! one physical listener and one client channel per address, created on
//! first use and torn down when the last service releases it.

// Core
pub mod error;
pub mod registry;
pub mod url;

// Configuration
pub mod conf;

// Adapters
pub mod facade;
pub mod transport;

// Test doubles
pub mod fake;

pub use error::{EndpointError, Result};
pub use facade::{ClientHandle, EndpointRegistry, ServerHandle};
pub use registry::{ReleaseOutcome, SharedEndpoint, SharedRegistry};
pub use url::{Address, ServiceKey, ServiceUrl};
