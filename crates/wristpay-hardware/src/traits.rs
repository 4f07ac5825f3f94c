//! Tag and adapter trait definitions.
//!
//! [`NfcTag`] is the opaque handle the platform hands out for each detected
//! tag; [`NfcAdapter`] switches reader mode on and delivers those handles.
//! Implementations exist for simulated hardware in [`crate::mock`].
//!
//! Futures returned by tag methods are `Send` so a tag can be processed on
//! a spawned task.

use crate::error::Result;
use crate::types::{ReaderOptions, Technology};
use std::future::Future;
use tokio::sync::mpsc;

/// Handle to one physical tag presence.
///
/// A tag must be connected before [`transceive`](NfcTag::transceive) and
/// should be closed when the operation is done. Closing drops any
/// authentication state the tag holds.
///
/// # Examples
///
/// ```no_run
/// use wristpay_hardware::traits::NfcTag;
/// use wristpay_hardware::Result;
///
/// async fn get_version<T: NfcTag>(tag: &mut T) -> Result<Vec<u8>> {
///     tag.connect().await?;
///     let version = tag.transceive(&[0x60]).await;
///     tag.close().await?;
///     version
/// }
/// ```
pub trait NfcTag: Send {
    /// Anti-collision identifier.
    fn id(&self) -> &[u8];

    /// Technologies advertised by the tag.
    fn technologies(&self) -> &[Technology];

    fn is_connected(&self) -> bool;

    /// Open the connection to the tag.
    fn connect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Close the connection. Closing an unconnected tag is a no-op.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Send a raw frame and return the raw response.
    fn transceive(&mut self, frame: &[u8]) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Returns `true` if the tag advertises `technology`.
    fn supports(&self, technology: &Technology) -> bool {
        self.technologies().contains(technology)
    }
}

/// Platform NFC adapter in reader mode.
pub trait NfcAdapter: Send + Sync {
    type Tag: NfcTag + 'static;

    /// Enable reader mode. Each detected tag is delivered on the returned
    /// channel, in presence order, until reader mode is disabled.
    fn enable_reader_mode(&self, options: &ReaderOptions) -> Result<mpsc::Receiver<Self::Tag>>;

    /// Disable reader mode and close the presence channel.
    fn disable_reader_mode(&self) -> Result<()>;

    fn is_reader_mode_enabled(&self) -> bool;
}
