//! Shared pieces for switchline: tracing setup, reconnect backoff, and
//! the tunnel-endpoint abstraction.

pub mod backoff;
pub mod endpoint;
pub mod tracing;

pub use backoff::Backoff;
pub use endpoint::TunnelEndpoint;
pub use tracing::init_tracing;
