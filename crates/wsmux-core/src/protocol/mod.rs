//! Protocol modules (envelope model, control topics, text + binary codecs).
//!
//! Two wire forms carry the same envelope:
//! - Text frames: a flat JSON object `{C, D, T, Q, R, I}`.
//! - Binary frames: an 8-byte little-endian length, the text form, then raw bytes.
//!
//! All decoders are panic-free: malformed input is reported as
//! `ClientError::Decode` instead of panicking or indexing raw buffers.

pub mod binary;
pub mod envelope;
pub mod text;
pub mod topics;

pub use envelope::{Data, Envelope, Kind};
