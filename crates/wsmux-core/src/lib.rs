//! wsmux core: transport-agnostic envelope, codec, control topics, and errors.
//!
//! This crate defines the wire-level contracts shared by the client and any
//! tooling that needs to read or produce frames. It carries no transport or
//! runtime dependencies.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Malformed frames
//! surface as [`ClientError::Decode`] and never take the process down.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ClientError, ErrorCode, Result};
pub use protocol::{topics, Data, Envelope, Kind};
