//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding protocol data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the maximum allowed size.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: u32, max: u32 },

    /// Zero-length frame received.
    #[error("empty frame")]
    EmptyFrame,

    /// Malformed JSON, or a frame that does not match the schema.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// A binary payload that is not valid base64.
    #[error("binary payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A binary payload whose wire representation is not a string.
    #[error("binary payload must be a base64 string, got {found}")]
    BinaryPayloadNotString {
        /// JSON type of the offending value.
        found: &'static str,
    },

    /// Frame payload is not valid UTF-8.
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
