//! The transport seam.
//!
//! The session engine consumes a [`TransportFactory`] and never names a
//! concrete transport, so the same engine runs over any message-framed
//! full-duplex byte transport. [`tcp::TcpTransport`] is the built-in
//! implementation.

pub mod tcp;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;

use switchline_protocol::ProtocolError;

/// Errors produced by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The URL could not be parsed for this transport.
    #[error("invalid transport url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The connection attempt failed.
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    /// An operation was attempted while the transport was not open.
    #[error("transport is not open")]
    NotOpen,

    /// An I/O failure on an established connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A framing violation on the wire.
    #[error("frame error: {0}")]
    Frame(#[from] ProtocolError),
}

/// Lifecycle state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Constructed, never connected.
    Idle,
    /// Connection attempt in flight.
    Connecting,
    /// Connected; messages flow.
    Open,
    /// Local close initiated.
    Closing,
    /// Fully closed.
    Closed,
}

/// A message travelling over a transport.
///
/// The engine sends text (JSON frames); transports may deliver inbound
/// payloads as text or as raw bytes, which the engine decodes as UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportPayload {
    /// A text message.
    Text(String),
    /// An opaque byte buffer.
    Binary(Vec<u8>),
}

/// Events emitted by a connected transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// An inbound message.
    Message(TransportPayload),
    /// The connection closed (remote close, EOF, or fatal I/O error).
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
    /// A non-fatal transport failure.
    Error(TransportError),
}

/// A message-oriented full-duplex transport.
///
/// Implementations deliver inbound traffic through the event channel
/// handed out by [`take_events`](Transport::take_events) and must never
/// block their delivery path on the consumer.
pub trait Transport: Send {
    /// Connects to `url`; resolves when the transport is open.
    fn connect(&mut self, url: &str) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Enqueues an outbound message. Never suspends; fails fast when the
    /// transport is not open.
    fn send(&mut self, payload: TransportPayload) -> Result<(), TransportError>;

    /// Begins closing the transport. Idempotent. `code` and `reason` are
    /// recorded for diagnostics; the wire protocol carries no close frame.
    fn close(&mut self, code: Option<u16>, reason: Option<String>);

    /// Returns the local view of the transport state.
    fn state(&self) -> TransportState;

    /// Takes the inbound event stream. Available once after a successful
    /// [`connect`](Transport::connect); returns `None` thereafter.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;
}

/// Supplies transport instances to the engine, one per connection attempt.
pub type TransportFactory = Arc<dyn Fn() -> Box<dyn Transport> + Send + Sync>;

/// The default factory: TCP with length-prefixed JSON framing.
#[must_use]
pub fn default_transport_factory() -> TransportFactory {
    Arc::new(|| Box::new(tcp::TcpTransport::new()))
}
