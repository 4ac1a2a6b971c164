//! Session error types.

use thiserror::Error;

use switchline_protocol::{AddressError, ProtocolError};

use crate::transport::TransportError;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by the session engine, calls, and tunnels.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Local address validation failed.
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    /// Operation invoked against the current call or engine state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// An in-flight operation was aborted because the connection closed.
    #[error("disconnected")]
    Disconnected,

    /// A dial or heartbeat deadline elapsed.
    #[error("operation timed out")]
    Timeout,

    /// The exchange rejected an outbound dial.
    #[error("call failed: {0}")]
    CallFailed(String),

    /// The exchange rejected a registration.
    #[error("registration failed: {0}")]
    RegistrationFailed(String),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A malformed inbound frame or payload.
    #[error("decode error: {0}")]
    Decode(#[from] ProtocolError),

    /// A tunnel's inbound buffer overran its high-watermark.
    #[error("tunnel backpressure: inbound buffer exceeded {0} bytes")]
    Backpressure(usize),

    /// A tunnel endpoint failed to start or pipe.
    #[error("tunnel endpoint error: {0}")]
    Endpoint(#[source] std::io::Error),
}

impl SessionError {
    pub(crate) fn illegal_state(detail: impl Into<String>) -> Self {
        Self::IllegalState(detail.into())
    }
}
