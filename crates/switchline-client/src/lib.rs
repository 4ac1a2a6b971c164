//! Client session engine for the switchline exchange.
//!
//! A [`Session`] registers an endpoint at an address, places and accepts
//! calls, exchanges typed messages within a call, and tunnels arbitrary
//! byte streams through a call as if it were a point-to-point pipe.
//!
//! ```rust,no_run
//! use switchline_client::{DialOptions, RegisterOptions, Session, SessionOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::new(
//!         vec!["tcp://127.0.0.1:9070".to_string()],
//!         SessionOptions::default(),
//!     );
//!     session.register("alice@example.com", RegisterOptions::new()).await?;
//!
//!     let call = session.dial("bob@example.com", DialOptions::new()).await?;
//!     call.send("Hello").await?;
//!     call.hangup(None).await?;
//!     session.close().await;
//!     Ok(())
//! }
//! ```

pub mod cli;

mod call;
mod error;
mod listeners;
mod options;
mod session;
mod stream;
pub mod transport;
mod tunnel;

pub use call::{Call, CallDirection, CallId, CallState};
pub use error::{SessionError, SessionResult};
pub use listeners::{ListenerSet, Subscription};
pub use options::{ConcurrencyMode, DialOptions, RegisterOptions, SessionOptions};
pub use session::{Disconnect, Session, SessionState};
pub use stream::{TunnelReader, TunnelStream, TunnelWriter};
pub use tunnel::{StderrObserver, TunnelEndpoint, TunnelHandle, TunnelOptions};

pub use switchline_protocol::{Address, AddressError, ContentType, MessagePayload};
