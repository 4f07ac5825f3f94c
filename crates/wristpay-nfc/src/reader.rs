//! Reader-mode lifecycle.
//!
//! [`NfcReader`] ties an [`NfcAdapter`] to a [`TagDispatcher`]: on
//! [`resume`](NfcReader::resume) it enables reader mode and spawns the
//! presence loop, on [`pause`](NfcReader::pause) it disables reader mode and
//! waits for the loop to finish the tag it is handling.
//!
//! ```text
//! adapter ── presence channel ──► loop ──► TagDispatcher ──► ScanBroker
//! ```

use crate::{
    broker::ScanBroker, config::ReaderConfig, dispatcher::TagDispatcher, error::Result,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wristpay_hardware::{NfcAdapter, ReaderOptions};

pub struct NfcReader<A: NfcAdapter> {
    adapter: Arc<A>,
    dispatcher: Arc<TagDispatcher>,
    options: ReaderOptions,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<A: NfcAdapter + 'static> NfcReader<A> {
    pub fn new(adapter: A, broker: Arc<ScanBroker>, config: &ReaderConfig) -> Self {
        Self {
            adapter: Arc::new(adapter),
            dispatcher: Arc::new(TagDispatcher::new(broker)),
            options: config.reader_options(),
            task: Mutex::new(None),
        }
    }

    pub fn broker(&self) -> &Arc<ScanBroker> {
        self.dispatcher.broker()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Enable reader mode and start dispatching presences.
    ///
    /// Resuming a running reader is a no-op.
    pub fn resume(&self) -> Result<()> {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }

        let mut presences = self.adapter.enable_reader_mode(&self.options)?;
        let dispatcher = Arc::clone(&self.dispatcher);
        *task = Some(tokio::spawn(async move {
            while let Some(tag) = presences.recv().await {
                dispatcher.handle_tag(tag).await;
            }
            debug!("Presence channel closed");
        }));
        info!(
            presence_check_delay_ms = self.options.presence_check_delay.as_millis() as u64,
            "NFC reader resumed"
        );
        Ok(())
    }

    /// Disable reader mode and wait for the presence loop to stop.
    pub async fn pause(&self) -> Result<()> {
        self.adapter.disable_reader_mode()?;
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "Presence loop ended abnormally");
        }
        info!("NFC reader paused");
        Ok(())
    }
}

impl<A: NfcAdapter> std::fmt::Debug for NfcReader<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NfcReader")
            .field("reader_mode", &self.adapter.is_reader_mode_enabled())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wristpay_core::{ScanRequest, ScanResult, Uid};
    use wristpay_hardware::mock::{MockNfcAdapter, MockTag};

    #[tokio::test]
    async fn test_resume_scan_pause() {
        let (adapter, handle) = MockNfcAdapter::new();
        let broker = Arc::new(ScanBroker::new());
        let reader = NfcReader::new(adapter, Arc::clone(&broker), &ReaderConfig::default());

        reader.resume().unwrap();
        reader.resume().unwrap();
        assert!(reader.is_running());
        assert_eq!(handle.enable_count(), 1);

        let scan = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.scan(ScanRequest::FastRead).await })
        };
        while !broker.has_pending_request() {
            tokio::task::yield_now().await;
        }
        let (tag, _) = MockTag::ultralight(&[0x04, 0xA3, 0x9C, 0x1B]).build();
        handle.present(tag).await.unwrap();

        assert_eq!(
            scan.await.unwrap().unwrap(),
            ScanResult::FastRead(Uid::new(0x04A39C1B))
        );

        reader.pause().await.unwrap();
        assert!(!reader.is_running());
        let (tag, _) = MockTag::ultralight(&[1, 2, 3, 4]).build();
        assert!(handle.present(tag).await.is_err());
    }

    #[tokio::test]
    async fn test_reader_options_from_config() {
        let (adapter, handle) = MockNfcAdapter::new();
        let config = ReaderConfig {
            presence_check_delay_ms: 800,
            platform_sounds: true,
        };
        let reader = NfcReader::new(adapter, Arc::new(ScanBroker::new()), &config);
        reader.resume().unwrap();

        let options = handle.last_options().unwrap();
        assert_eq!(options.presence_check_delay.as_millis(), 800);
        assert!(options.flags.nfc_a);
        assert!(!options.flags.no_platform_sounds);
        reader.pause().await.unwrap();
    }
}
