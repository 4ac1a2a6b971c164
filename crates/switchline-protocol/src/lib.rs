//! Wire protocol for the switchline exchange.
//!
//! The exchange speaks JSON-per-frame over a message-framed bidirectional
//! transport. Every frame is a JSON object with a `type` tag and snake_case
//! fields:
//!
//! ```text
//! {"type":"DIAL","to":"alice@example.com"}
//! {"type":"MSG","call_id":"c-17","data":"hello","content_type":"text"}
//! ```
//!
//! This crate defines:
//! - [`Address`] — validated `local@domain` endpoint identifiers
//! - [`ClientFrame`] / [`ServerFrame`] — the outbound and inbound frame sets
//! - [`MessagePayload`] — typed in-call message bodies (text / structured /
//!   binary) and their wire encoding (binary travels as base64)
//! - [`encode_frame`] / [`decode_frame`] — length-prefixed framing used by
//!   message-framed byte transports
//!
//! Unknown inbound frame types decode to [`ServerFrame::Unknown`] and are
//! ignored by the session engine; unknown fields within known types are
//! ignored.

mod address;
mod error;
mod frame;
mod framing;
mod payload;

pub use address::{Address, AddressError};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{ClientFrame, ServerFrame};
pub use framing::{MAX_FRAME_SIZE, decode_frame, encode_frame};
pub use payload::{ContentType, MessagePayload};

/// Close code the engine uses when the heartbeat deadline elapses.
pub const HEARTBEAT_TIMEOUT_CLOSE_CODE: u16 = 4000;

/// Close reason accompanying [`HEARTBEAT_TIMEOUT_CLOSE_CODE`].
pub const HEARTBEAT_TIMEOUT_REASON: &str = "heartbeat_timeout";
