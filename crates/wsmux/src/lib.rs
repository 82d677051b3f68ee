//! Top-level facade crate for wsmux.
//!
//! Re-exports the protocol core and the client library so users can depend on a single crate.

pub mod core {
    pub use wsmux_core::*;
}

pub mod client {
    pub use wsmux_client::*;
}
