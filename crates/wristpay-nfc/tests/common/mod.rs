//! Shared helpers for NFC integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use wristpay_core::{AuthKey, ScanRequest, ScanResult};
use wristpay_hardware::mock::MockTag;
use wristpay_nfc::{BrokerError, ScanBroker, TagDispatcher};

pub const TDES_SECRET: [u8; 6] = [0x4B, 0x45, 0x59, 0x30, 0x30, 0x31];
pub const AES_KEY: [u8; 16] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF,
];

/// Install a fmt subscriber honouring `RUST_LOG`. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn tdes_key() -> AuthKey {
    AuthKey::Tdes(TDES_SECRET)
}

pub fn aes_key() -> AuthKey {
    AuthKey::Aes(AES_KEY)
}

/// Broker plus dispatcher, driven by hand instead of through a reader.
pub struct Harness {
    pub broker: Arc<ScanBroker>,
    pub dispatcher: TagDispatcher,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let broker = Arc::new(ScanBroker::new());
        let dispatcher = TagDispatcher::new(Arc::clone(&broker));
        Self { broker, dispatcher }
    }

    /// Start `scan` on its own task and wait until the request is published.
    pub async fn start_scan(&self, request: ScanRequest) -> JoinHandle<Result<ScanResult, BrokerError>> {
        let broker = Arc::clone(&self.broker);
        let task = tokio::spawn(async move { broker.scan(request).await });
        while !self.broker.has_pending_request() {
            tokio::task::yield_now().await;
        }
        task
    }

    /// Issue `request` and present `tag`, returning the caller's result.
    pub async fn scan_with(&self, request: ScanRequest, tag: MockTag) -> ScanResult {
        let task = self.start_scan(request).await;
        self.dispatcher.handle_tag(tag).await;
        task.await.expect("scan task").expect("scan accepted")
    }
}

/// Page addressed by a plain READ or WRITE frame.
pub fn addressed_page(frame: &[u8]) -> Option<(u8, u8)> {
    match frame {
        [0x30, page] => Some((0x30, *page)),
        [0xA2, page, _, _, _, _] => Some((0xA2, *page)),
        _ => None,
    }
}
