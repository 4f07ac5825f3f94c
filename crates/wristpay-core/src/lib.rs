//! Shared types for the wristband NFC subsystem.
//!
//! This crate holds the pieces every other layer agrees on: the
//! [`BitVector`] payload buffer, the memory layout of the supported chip
//! families, and the request/result data model exchanged between the
//! application and the tag dispatcher.

pub mod bitvec;
pub mod constants;
pub mod error;
pub mod types;

pub use bitvec::BitVector;
pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
