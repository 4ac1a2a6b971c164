//! Length-prefixed message framing for byte-stream transports.
//!
//! Frames carry a 4-byte big-endian length prefix followed by the JSON
//! payload:
//!
//! ```text
//! +----------------+------------------+
//! | length (4 BE)  |  JSON payload    |
//! +----------------+------------------+
//! ```

use crate::{ProtocolError, ProtocolResult};

/// Maximum frame payload size (1 MiB).
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

const LEN_SIZE: usize = 4;

/// Encodes a payload into a single frame ready for transmission.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if the payload exceeds
/// [`MAX_FRAME_SIZE`] and [`ProtocolError::EmptyFrame`] for an empty
/// payload.
pub fn encode_frame(payload: &[u8]) -> ProtocolResult<Vec<u8>> {
    if payload.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    let len = payload.len() as u32;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buffer = Vec::with_capacity(LEN_SIZE + payload.len());
    buffer.extend_from_slice(&len.to_be_bytes());
    buffer.extend_from_slice(payload);
    Ok(buffer)
}

/// Decodes one frame from the front of `buf`.
///
/// Returns `Ok(Some((payload, consumed)))` for a complete frame and
/// `Ok(None)` when more bytes are needed. Callers accumulate stream reads
/// into a buffer, drain `consumed` bytes per decoded frame, and retry.
///
/// # Errors
///
/// Returns an error for oversized or zero-length frames; the connection
/// should be dropped, since the stream can no longer be re-synchronized.
pub fn decode_frame(buf: &[u8]) -> ProtocolResult<Option<(Vec<u8>, usize)>> {
    if buf.len() < LEN_SIZE {
        return Ok(None);
    }

    let len_bytes: [u8; 4] = buf[..LEN_SIZE].try_into().expect("slice length checked");
    let len = u32::from_be_bytes(len_bytes);

    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    if len == 0 {
        return Err(ProtocolError::EmptyFrame);
    }

    let total = LEN_SIZE + len as usize;
    if buf.len() < total {
        return Ok(None);
    }

    Ok(Some((buf[LEN_SIZE..total].to_vec(), total)))
}
