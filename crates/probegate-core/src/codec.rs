//! Length-prefixed JSON frame codec for the raw TCP transport.
//!
//! Frames are a 4-byte big-endian length prefix followed by a JSON-encoded
//! [`Envelope`]. The WebSocket transport carries the same JSON as text
//! messages and does not use this codec.
//!
//! # Security Considerations
//!
//! The frame length is validated against [`MAX_FRAME_SIZE`] BEFORE any
//! allocation, so a hostile length prefix cannot cause memory exhaustion.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::envelope::Envelope;

/// Maximum frame size in bytes (1 MiB).
///
/// Bridge envelopes are control/telemetry messages; anything larger is a
/// protocol violation.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length prefix size in bytes.
const LEN_PREFIX: usize = 4;

/// Errors produced by the envelope codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Frame length prefix exceeds the maximum allowed size.
    #[error("frame too large: {size} bytes exceeds maximum {max} bytes")]
    FrameTooLarge {
        /// Size declared by the length prefix.
        size: usize,
        /// Maximum allowed frame size.
        max: usize,
    },

    /// Frame payload is not a valid envelope.
    #[error("invalid envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying transport error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Codec turning a byte stream into [`Envelope`] frames and back.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeCodec;

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, CodecError> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }

        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(&src[..LEN_PREFIX]);
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }

        if src.len() < LEN_PREFIX + len {
            // Partial frame; reserve what we still expect.
            src.reserve(LEN_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let payload = src.split_to(len);
        let envelope = serde_json::from_slice(&payload)?;
        Ok(Some(envelope))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), CodecError> {
        let payload = serde_json::to_vec(&item)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        dst.reserve(LEN_PREFIX + payload.len());
        dst.put_u32(u32::try_from(payload.len()).expect("payload bounded by MAX_FRAME_SIZE"));
        dst.put_slice(&payload);
        Ok(())
    }
}

/// Encode an envelope into a standalone frame buffer.
///
/// Convenience for test clients and the sniffer path, which inspect raw
/// frame bytes before a codec-wrapped stream exists.
///
/// # Errors
///
/// Returns [`CodecError::FrameTooLarge`] or [`CodecError::Json`] on encode
/// failure.
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    let mut buf = BytesMut::new();
    EnvelopeCodec.encode(envelope.clone(), &mut buf)?;
    Ok(buf.to_vec())
}
