//! Registry — address-keyed sharing of expensive endpoints across logical
//! services, with holder tracking and exactly-once teardown.

pub mod handle;
pub mod metrics;
pub mod shared;

pub use handle::{BoxFuture, Endpoint, EndpointFactory, EndpointKind, EndpointState, SharedEndpoint};
pub use metrics::{MetricsSnapshot, RegistryMetrics};
pub use shared::{EntrySnapshot, ReleaseOutcome, SharedRegistry};
