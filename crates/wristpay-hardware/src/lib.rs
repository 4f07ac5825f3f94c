//! Hardware abstraction for the contactless reader.
//!
//! This crate defines the seam between the tag protocol and the platform's
//! NFC stack:
//!
//! - [`NfcAdapter`] enables reader mode and delivers a tag handle for every
//!   presence, on a context the application does not control.
//! - [`NfcTag`] is that handle: connect, transceive raw frames, close.
//!
//! # Simulated hardware
//!
//! The [`mock`] module provides a [`MockNfcAdapter`](mock::MockNfcAdapter)
//! and a [`MockTag`](mock::MockTag) that behaves like a MIFARE Ultralight,
//! Ultralight-C or Ultralight-AES tag, including the tag side of the
//! authentication handshakes and CMAC secure messaging. Tests inspect every
//! frame the tag received through its [`MockTagHandle`](mock::MockTagHandle).
//!
//! ```
//! use wristpay_hardware::mock::MockTag;
//! use wristpay_hardware::traits::NfcTag;
//!
//! #[tokio::main]
//! async fn main() -> wristpay_hardware::Result<()> {
//!     let (mut tag, spy) = MockTag::ultralight(&[0x04, 0xA3, 0x9C, 0x1B]).build();
//!
//!     tag.connect().await?;
//!     let block = tag.transceive(&[0x30, 0x04]).await?;
//!     tag.close().await?;
//!
//!     assert_eq!(block.len(), 16);
//!     assert_eq!(spy.frames(), vec![vec![0x30, 0x04]]);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod mock;
pub mod traits;
pub mod types;

pub use error::{HardwareError, Result};
pub use traits::{NfcAdapter, NfcTag};
pub use types::{ReaderFlags, ReaderOptions, Technology, detect_family};
