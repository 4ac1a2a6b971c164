//! Session, registration, and dial options.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use switchline_protocol::Address;

use crate::transport::TransportFactory;

/// How the exchange distributes inbound calls across an address's
/// registrations. Opaque to the engine; forwarded in `REGISTER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyMode {
    /// One call at a time.
    Single,
    /// Every registration receives each call.
    Broadcast,
    /// Calls are spread across registrations.
    Parallel,
}

impl ConcurrencyMode {
    /// Wire spelling of the mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Broadcast => "broadcast",
            Self::Parallel => "parallel",
        }
    }
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for [`Session::register`](crate::Session::register).
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    /// Opaque metadata forwarded to the exchange.
    pub metadata: Option<Value>,
    /// Call distribution mode.
    pub concurrency_mode: Option<ConcurrencyMode>,
    /// Listener cap hint.
    pub max_listeners: Option<u32>,
    /// Session cap hint.
    pub max_sessions: Option<u32>,
    /// Pool size hint.
    pub pool_size: Option<u32>,
}

impl RegisterOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Builder: set the concurrency mode.
    #[must_use]
    pub fn with_concurrency_mode(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency_mode = Some(mode);
        self
    }

    /// Builder: set the pool size hint.
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = Some(pool_size);
        self
    }
}

/// A registration pinned on the engine. Retained across reconnects to
/// drive re-registration until explicit teardown.
#[derive(Debug, Clone)]
pub(crate) struct RegistrationRequest {
    pub address: Address,
    pub options: RegisterOptions,
}

/// Options for [`Session::dial`](crate::Session::dial).
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    /// Opaque metadata forwarded to the exchange.
    pub metadata: Option<Value>,
    /// Reject the dial with a timeout error if neither `CONNECTED` nor
    /// `BUSY` matches in time.
    pub timeout: Option<Duration>,
}

impl DialOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Builder: set a dial timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Engine configuration.
#[derive(Clone)]
pub struct SessionOptions {
    /// Supplies transport instances; defaults to the TCP transport.
    pub transport_factory: Option<TransportFactory>,
    /// Heartbeat send cadence; `Duration::ZERO` disables heartbeats.
    pub heartbeat_interval: Duration,
    /// Time since the last ack before the connection is declared dead.
    pub heartbeat_timeout: Duration,
    /// Enable the reconnect loop.
    pub auto_reconnect: bool,
    /// Initial reconnect backoff.
    pub reconnect_backoff: Duration,
    /// Reconnect backoff cap.
    pub max_reconnect_backoff: Duration,
    /// Resend the pinned registration after reconnect.
    pub register_on_connect: bool,
    /// Log engine-internal events at debug level.
    pub debug: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            transport_factory: None,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            auto_reconnect: true,
            reconnect_backoff: Duration::from_secs(1),
            max_reconnect_backoff: Duration::from_secs(30),
            register_on_connect: true,
            debug: false,
        }
    }
}

impl SessionOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: supply a custom transport factory.
    #[must_use]
    pub fn with_transport_factory(mut self, factory: TransportFactory) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// Builder: set the heartbeat cadence (`Duration::ZERO` disables).
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Builder: set the heartbeat ack deadline.
    #[must_use]
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Builder: enable or disable the reconnect loop.
    #[must_use]
    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    /// Builder: set the initial reconnect backoff.
    #[must_use]
    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Builder: set the reconnect backoff cap.
    #[must_use]
    pub fn with_max_reconnect_backoff(mut self, cap: Duration) -> Self {
        self.max_reconnect_backoff = cap;
        self
    }

    /// Builder: control re-registration after reconnect.
    #[must_use]
    pub fn with_register_on_connect(mut self, register_on_connect: bool) -> Self {
        self.register_on_connect = register_on_connect;
        self
    }

    /// Builder: enable debug-level engine logging.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field(
                "transport_factory",
                &self.transport_factory.as_ref().map(|_| "<custom>"),
            )
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("heartbeat_timeout", &self.heartbeat_timeout)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("reconnect_backoff", &self.reconnect_backoff)
            .field("max_reconnect_backoff", &self.max_reconnect_backoff)
            .field("register_on_connect", &self.register_on_connect)
            .field("debug", &self.debug)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let options = SessionOptions::default();
        assert!(options.transport_factory.is_none());
        assert_eq!(options.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(options.heartbeat_timeout, Duration::from_secs(60));
        assert!(options.auto_reconnect);
        assert_eq!(options.reconnect_backoff, Duration::from_secs(1));
        assert_eq!(options.max_reconnect_backoff, Duration::from_secs(30));
        assert!(options.register_on_connect);
        assert!(!options.debug);
    }

    #[test]
    fn builders_override_fields() {
        let options = SessionOptions::new()
            .with_heartbeat_interval(Duration::from_millis(5))
            .with_heartbeat_timeout(Duration::from_millis(10))
            .with_auto_reconnect(false)
            .with_debug(true);

        assert_eq!(options.heartbeat_interval, Duration::from_millis(5));
        assert_eq!(options.heartbeat_timeout, Duration::from_millis(10));
        assert!(!options.auto_reconnect);
        assert!(options.debug);
    }

    #[test]
    fn concurrency_mode_wire_spelling() {
        assert_eq!(ConcurrencyMode::Single.as_str(), "single");
        assert_eq!(ConcurrencyMode::Broadcast.as_str(), "broadcast");
        assert_eq!(ConcurrencyMode::Parallel.as_str(), "parallel");
    }
}
