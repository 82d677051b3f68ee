//! Binary frame codec (panic-free).
//!
//! Layout: `[u64 LE header length L][L bytes: text frame JSON][payload...]`.
//!
//! Parsing rules:
//! - Never index (`buf[0]`); always use `Buf` and `remaining()` checks.
//! - Never `unwrap()` / `expect()` / `panic!()` in production paths.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ClientError, Result};
use crate::protocol::envelope::Envelope;
use crate::protocol::text::{decode_text, encode_text};

/// Size of the little-endian header length prefix.
pub const LENGTH_PREFIX: usize = 8;

/// Encode the binary form. An envelope without a binary payload encodes
/// with an empty trailer.
pub fn encode_binary(env: &Envelope) -> Result<Bytes> {
    let header = encode_text(env)?;
    let payload = env.binary.as_deref().unwrap_or_default();

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX + header.len() + payload.len());
    buf.put_u64_le(header.len() as u64);
    buf.put_slice(header.as_bytes());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Decode a binary frame into a binary-kind envelope.
pub fn decode_binary(mut buf: Bytes) -> Result<Envelope> {
    if buf.remaining() < LENGTH_PREFIX {
        return Err(ClientError::Decode("binary frame too short".into()));
    }

    let declared = buf.get_u64_le();
    let header_len = usize::try_from(declared)
        .map_err(|_| ClientError::Decode(format!("header length {declared} out of range")))?;

    if buf.remaining() < header_len {
        return Err(ClientError::Decode(format!(
            "header length {header_len} exceeds frame ({} bytes left)",
            buf.remaining()
        )));
    }

    let header = buf.split_to(header_len);
    let text = std::str::from_utf8(&header)
        .map_err(|e| ClientError::Decode(format!("header is not utf-8: {e}")))?;

    let mut env = decode_text(text)?;
    // Remaining bytes are payload (zero-copy).
    env.binary = Some(buf);
    Ok(env)
}
