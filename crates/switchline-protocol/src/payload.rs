//! In-call message payloads.
//!
//! The wire is JSON-text-oriented, so binary payloads travel as base64
//! strings and structured payloads as JSON strings. Keeping the encoding
//! here, behind the payload type, means a future binary-native transport
//! can switch to raw bytes without touching the session engine.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ProtocolError, ProtocolResult};

/// Content type tag carried on `MSG` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Raw text.
    Text,
    /// A JSON document, serialized to a string on the wire.
    Structured,
    /// Arbitrary bytes, base64-encoded on the wire.
    Binary,
}

/// A typed in-call message body.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    /// Raw text.
    Text(String),
    /// A structured (JSON) value.
    Structured(Value),
    /// Arbitrary bytes.
    Binary(Vec<u8>),
}

impl MessagePayload {
    /// Returns the wire content type for this payload.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        match self {
            Self::Text(_) => ContentType::Text,
            Self::Structured(_) => ContentType::Structured,
            Self::Binary(_) => ContentType::Binary,
        }
    }

    /// Encodes the payload into its wire `data` string.
    ///
    /// # Errors
    ///
    /// Returns an error if a structured value fails to serialize.
    pub fn encode(&self) -> ProtocolResult<String> {
        match self {
            Self::Text(text) => Ok(text.clone()),
            Self::Structured(value) => Ok(serde_json::to_string(value)?),
            Self::Binary(bytes) => Ok(BASE64.encode(bytes)),
        }
    }

    /// Decodes a wire `data` value given its declared content type.
    ///
    /// Structured payloads may arrive either as JSON strings (which are
    /// re-parsed; unparseable strings are delivered as text) or as
    /// already-parsed objects. Content types this client does not know are
    /// treated like text.
    ///
    /// # Errors
    ///
    /// Returns an error for binary payloads that are not base64 strings.
    pub fn decode(data: Value, content_type: Option<&str>) -> ProtocolResult<Self> {
        match content_type {
            Some("binary") => match data {
                Value::String(encoded) => Ok(Self::Binary(BASE64.decode(encoded.as_bytes())?)),
                other => Err(ProtocolError::BinaryPayloadNotString {
                    found: json_type_name(&other),
                }),
            },
            Some("structured" | "json") => match data {
                Value::String(text) => match serde_json::from_str(&text) {
                    Ok(value) => Ok(Self::Structured(value)),
                    Err(_) => Ok(Self::Text(text)),
                },
                value => Ok(Self::Structured(value)),
            },
            _ => match data {
                Value::String(text) => Ok(Self::Text(text)),
                value => Ok(Self::Structured(value)),
            },
        }
    }
}

impl From<&str> for MessagePayload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for MessagePayload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Value> for MessagePayload {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

impl From<Vec<u8>> for MessagePayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<&[u8]> for MessagePayload {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(bytes.to_vec())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
