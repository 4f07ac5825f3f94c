//! Mock NFC adapter.
//!
//! [`MockNfcAdapter`] plays the platform side of reader mode: while enabled,
//! every tag presented through its [`MockNfcAdapterHandle`] is delivered on
//! the presence channel, exactly as a platform callback would deliver it.

use crate::{
    error::{HardwareError, Result},
    mock::MockTag,
    traits::NfcAdapter,
    types::ReaderOptions,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Capacity of the presence channel.
const PRESENCE_QUEUE: usize = 16;

#[derive(Debug, Default)]
struct AdapterState {
    sender: Option<mpsc::Sender<MockTag>>,
    last_options: Option<ReaderOptions>,
    enable_count: usize,
}

/// Simulated adapter delivering [`MockTag`]s.
///
/// # Examples
///
/// ```
/// use wristpay_hardware::mock::{MockNfcAdapter, MockTag};
/// use wristpay_hardware::{NfcAdapter, NfcTag, ReaderOptions};
///
/// #[tokio::main]
/// async fn main() -> wristpay_hardware::Result<()> {
///     let (adapter, handle) = MockNfcAdapter::new();
///     let mut presences = adapter.enable_reader_mode(&ReaderOptions::default())?;
///
///     let (tag, _spy) = MockTag::ultralight(&[0x04, 0xA3, 0x9C, 0x1B]).build();
///     handle.present(tag).await?;
///
///     let delivered = presences.recv().await.expect("tag delivered");
///     assert_eq!(delivered.id(), &[0x04, 0xA3, 0x9C, 0x1B]);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockNfcAdapter {
    state: Arc<Mutex<AdapterState>>,
}

impl MockNfcAdapter {
    /// Create an adapter with reader mode disabled.
    pub fn new() -> (Self, MockNfcAdapterHandle) {
        let state = Arc::new(Mutex::new(AdapterState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockNfcAdapterHandle { state },
        )
    }
}

impl NfcAdapter for MockNfcAdapter {
    type Tag = MockTag;

    fn enable_reader_mode(&self, options: &ReaderOptions) -> Result<mpsc::Receiver<MockTag>> {
        let (tx, rx) = mpsc::channel(PRESENCE_QUEUE);
        let mut state = self.state.lock();
        state.sender = Some(tx);
        state.last_options = Some(*options);
        state.enable_count += 1;
        debug!(options = ?options, "Reader mode enabled");
        Ok(rx)
    }

    fn disable_reader_mode(&self) -> Result<()> {
        self.state.lock().sender = None;
        debug!("Reader mode disabled");
        Ok(())
    }

    fn is_reader_mode_enabled(&self) -> bool {
        self.state.lock().sender.is_some()
    }
}

/// Handle for presenting tags to a [`MockNfcAdapter`].
#[derive(Debug, Clone)]
pub struct MockNfcAdapterHandle {
    state: Arc<Mutex<AdapterState>>,
}

impl MockNfcAdapterHandle {
    /// Bring `tag` into the field.
    ///
    /// # Errors
    /// [`HardwareError::ReaderModeDisabled`] if reader mode is off or the
    /// presence channel has been dropped.
    pub async fn present(&self, tag: MockTag) -> Result<()> {
        let sender = self
            .state
            .lock()
            .sender
            .clone()
            .ok_or(HardwareError::ReaderModeDisabled)?;
        sender
            .send(tag)
            .await
            .map_err(|_| HardwareError::ReaderModeDisabled)
    }

    /// Options passed on the most recent enable.
    pub fn last_options(&self) -> Option<ReaderOptions> {
        self.state.lock().last_options
    }

    /// How many times reader mode was enabled.
    pub fn enable_count(&self) -> usize {
        self.state.lock().enable_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_present_requires_reader_mode() {
        let (_adapter, handle) = MockNfcAdapter::new();
        let (tag, _) = MockTag::ultralight(&[1, 2, 3, 4]).build();
        assert!(matches!(
            handle.present(tag).await,
            Err(HardwareError::ReaderModeDisabled)
        ));
    }

    #[tokio::test]
    async fn test_tags_delivered_in_presence_order() {
        let (adapter, handle) = MockNfcAdapter::new();
        let mut rx = adapter.enable_reader_mode(&ReaderOptions::default()).unwrap();

        for id in [[1u8, 1, 1, 1], [2, 2, 2, 2]] {
            let (tag, _) = MockTag::ultralight(&id).build();
            handle.present(tag).await.unwrap();
        }
        assert_eq!(crate::NfcTag::id(&rx.recv().await.unwrap()), &[1, 1, 1, 1]);
        assert_eq!(crate::NfcTag::id(&rx.recv().await.unwrap()), &[2, 2, 2, 2]);
    }

    #[tokio::test]
    async fn test_disable_closes_channel() {
        let (adapter, handle) = MockNfcAdapter::new();
        let options = ReaderOptions {
            presence_check_delay: Duration::from_millis(750),
            ..ReaderOptions::default()
        };
        let mut rx = adapter.enable_reader_mode(&options).unwrap();
        assert!(adapter.is_reader_mode_enabled());
        assert_eq!(handle.last_options(), Some(options));

        adapter.disable_reader_mode().unwrap();
        assert!(!adapter.is_reader_mode_enabled());
        assert!(rx.recv().await.is_none());
        assert_eq!(handle.enable_count(), 1);
    }
}
