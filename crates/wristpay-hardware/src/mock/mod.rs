//! Simulated NFC hardware for testing and development.
//!
//! The adapter and tags here can be driven programmatically without a
//! platform NFC stack.

pub mod adapter;
pub mod tag;

pub use adapter::{MockNfcAdapter, MockNfcAdapterHandle};
pub use tag::{MockTag, MockTagBuilder, MockTagHandle};
