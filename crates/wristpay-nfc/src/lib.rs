//! Wristband NFC subsystem: sessions, request execution and the scan mailbox.
//!
//! Application code issues one [`ScanRequest`](wristpay_core::ScanRequest)
//! at a time through [`ScanBroker::scan`] and awaits its result. The
//! [`NfcReader`] delivers every detected tag to the [`TagDispatcher`], which
//! takes the pending request, runs it in a [`TagSession`] and publishes the
//! result back through the broker.
//!
//! ```text
//!  application            ScanBroker             TagDispatcher        tag
//!  ───────────            ──────────             ─────────────        ───
//!  scan(request) ───────► request slot
//!                         request slot ────────► take_request()
//!                                                TagSession::open ───► connect
//!                                                authenticate, read ─► frames
//!                                                close ──────────────► close
//!                         result slot ◄───────── complete(result)
//!  result ◄────────────── result slot
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use wristpay_core::{ScanRequest, ScanResult, Uid};
//! use wristpay_hardware::mock::{MockNfcAdapter, MockTag};
//! use wristpay_nfc::{NfcReader, ReaderConfig, ScanBroker};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (adapter, field) = MockNfcAdapter::new();
//!     let broker = Arc::new(ScanBroker::new());
//!     let reader = NfcReader::new(adapter, Arc::clone(&broker), &ReaderConfig::default());
//!     reader.resume()?;
//!
//!     let scan = tokio::spawn({
//!         let broker = Arc::clone(&broker);
//!         async move { broker.scan(ScanRequest::FastRead).await }
//!     });
//!     while !broker.has_pending_request() {
//!         tokio::task::yield_now().await;
//!     }
//!
//!     let (tag, _spy) = MockTag::ultralight(&[0x04, 0xA3, 0x9C, 0x1B]).build();
//!     field.present(tag).await?;
//!
//!     assert_eq!(scan.await??, ScanResult::FastRead(Uid::new(0x04A39C1B)));
//!     reader.pause().await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod operations;
pub mod reader;
pub mod session;

pub use broker::{ScanBroker, ScanStatus, Ticket};
pub use config::{ReaderConfig, ScanPolicy};
pub use dispatcher::TagDispatcher;
pub use error::{BrokerError, Result, TagError};
pub use reader::NfcReader;
pub use session::TagSession;
