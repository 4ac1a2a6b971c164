//! Exchange frame types.
//!
//! [`ClientFrame`] is what an endpoint sends to the exchange,
//! [`ServerFrame`] is what it receives. Both are internally tagged JSON
//! objects; metadata objects are opaque and passed through unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolResult;
use crate::payload::ContentType;

/// Frames sent from an endpoint to the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientFrame {
    /// Register this endpoint at an address.
    Register {
        address: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        concurrency_mode: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_listeners: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_sessions: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pool_size: Option<u32>,
    },

    /// Drop the registration for an address.
    Unregister { address: String },

    /// Keepalive; the exchange answers with `HEARTBEAT_ACK`.
    Heartbeat,

    /// Place an outbound call to another address.
    Dial {
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },

    /// Accept an inbound (ringing) call.
    Answer { call_id: String },

    /// End a call.
    Hangup {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// An in-call message. `data` is raw text, a JSON string for structured
    /// payloads, or base64 for binary payloads.
    Msg {
        call_id: String,
        data: String,
        content_type: ContentType,
    },
}

/// Frames received from the exchange.
///
/// Unknown frame types decode to [`ServerFrame::Unknown`]; the engine drops
/// them. Unknown fields within known frames are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerFrame {
    /// Registration succeeded.
    Registered {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<String>,
    },

    /// Registration rejected.
    RegisterFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Inbound call: someone dialled this endpoint.
    Ring {
        call_id: String,
        from: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },

    /// An outbound dial was accepted by the callee.
    Connected {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
    },

    /// An outbound dial was rejected or the callee is unavailable.
    Busy {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// An in-call message. `data` is usually a string; structured payloads
    /// may arrive as already-parsed objects, which the codec tolerates.
    Msg {
        call_id: String,
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
    },

    /// The peer (or the exchange) ended a call.
    Hangup {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Answer to a `HEARTBEAT`.
    HeartbeatAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Any frame type this client does not understand.
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    /// Encodes the frame to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a client frame from JSON (used by exchange-side code and
    /// test harnesses).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`](crate::ProtocolError::Json) for
    /// malformed input.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ServerFrame {
    /// Decodes a frame from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`](crate::ProtocolError::Json) for
    /// malformed input. A well-formed
    /// object with an unrecognized `type` decodes to
    /// [`ServerFrame::Unknown`], not an error.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encodes a server frame to JSON (used by exchange-side code and test
    /// harnesses).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
