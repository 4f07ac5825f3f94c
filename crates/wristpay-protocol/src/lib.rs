//! Wire protocol for the MIFARE Ultralight family.
//!
//! The crate is pure: it builds and parses frames, runs the authentication
//! state machines and computes CMACs, but never talks to hardware. The
//! session layer feeds it the raw bytes a tag returned.
//!
//! - [`CommandCodec`] encodes commands and validates responses. All
//!   preconditions (page range, payload length, key type) are checked before
//!   a frame is produced.
//! - [`AuthEngine`] drives the 3DES or AES challenge-response handshake.
//! - [`SecureChannel`] authenticates frames with a CMAC after an AES
//!   handshake.
//!
//! # Example
//!
//! ```
//! use wristpay_core::ChipFamily;
//! use wristpay_protocol::CommandCodec;
//!
//! let codec = CommandCodec::new(ChipFamily::Ultralight);
//! let frame = codec.encode_read(4).unwrap();
//! assert_eq!(frame.to_bytes().unwrap(), vec![0x30, 0x04]);
//!
//! // page 48 does not exist on an Ultralight tag
//! assert!(codec.encode_read(48).is_err());
//! ```

pub mod auth;
pub mod codec;
pub mod commands;
pub mod crypto;
pub mod error;
pub mod secure_channel;

pub use auth::{AesAuthenticator, AesState, AuthEngine, TdesAuthenticator, TdesState};
pub use codec::CommandCodec;
pub use commands::{CommandCode, KeyType};
pub use error::{ProtocolError, Result};
pub use secure_channel::SecureChannel;
