//! Binary encoding for performatives.
//!
//! The connection layer owns the framing of performatives onto the wire;
//! this module exists so the session can measure how large a Transfer
//! performative encodes to, which determines how many payload bytes fit in
//! one physical frame alongside the fixed frame header.

use bincode::config::{self, Configuration};
use thiserror::Error;

use super::Performative;

/// Size of the fixed frame header preceding every encoded performative.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Errors produced while encoding or decoding performatives.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Encoding a performative failed.
    #[error("failed to encode performative: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    /// Decoding a performative failed.
    #[error("failed to decode performative: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

fn codec_config() -> Configuration {
    config::standard()
}

/// Encode a performative to bytes.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode(frame: &Performative) -> Result<Vec<u8>, CodecError> {
    Ok(bincode::serde::encode_to_vec(frame, codec_config())?)
}

/// Decode one performative from `bytes`, returning it and the bytes consumed.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the bytes do not form a performative.
pub fn decode(bytes: &[u8]) -> Result<(Performative, usize), CodecError> {
    Ok(bincode::serde::decode_from_slice(bytes, codec_config())?)
}

/// Measure the encoded size of a performative without retaining the bytes.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encoded_len(frame: &Performative) -> Result<usize, CodecError> {
    encode(frame).map(|bytes| bytes.len())
}
