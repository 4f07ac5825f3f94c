//! Per-presence handling of detected tags.
//!
//! For each tag the reader delivers, [`TagDispatcher::handle_tag`]:
//!
//! 1. rejects tags without NFC-A,
//! 2. identifies the chip family from the advertised technologies,
//! 3. takes the pending request, or only probes the tag if there is none,
//! 4. runs the request in a [`TagSession`],
//! 5. closes the session on every path,
//! 6. hands the result to the [`ScanBroker`].
//!
//! The dispatcher never calls back into application code; the broker is its
//! only output.

use crate::{broker::ScanBroker, operations, session::TagSession};
use std::sync::Arc;
use tracing::{debug, warn};
use wristpay_core::{ChipFamily, ScanFailure, ScanRequest, ScanResult};
use wristpay_hardware::{NfcTag, Technology, detect_family};

#[derive(Debug, Clone)]
pub struct TagDispatcher {
    broker: Arc<ScanBroker>,
}

impl TagDispatcher {
    pub fn new(broker: Arc<ScanBroker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<ScanBroker> {
        &self.broker
    }

    /// Handle one tag presence.
    pub async fn handle_tag<T: NfcTag>(&self, mut tag: T) {
        let id = hex::encode_upper(tag.id());
        debug!(%id, technologies = ?tag.technologies(), "Tag detected");

        if !tag.supports(&Technology::NfcA) {
            warn!(%id, "Tag without NFC-A ignored");
            self.broker.publish_result(
                ScanFailure::Incompatible("device has no NfcA support".to_string()).into(),
            );
            return;
        }
        let Some(family) = detect_family(tag.technologies()) else {
            warn!(%id, "Unsupported chip family");
            self.broker
                .publish_result(ScanFailure::Incompatible("tag not supported".to_string()).into());
            return;
        };

        let Some((ticket, request)) = self.broker.take_request() else {
            probe(&mut tag).await;
            return;
        };

        let result = run(tag, family, &request).await;
        self.broker.complete(ticket, result);
    }
}

/// Connect and close without a request, as a liveness check.
async fn probe<T: NfcTag>(tag: &mut T) {
    match tag.connect().await {
        Ok(()) => debug!("Probe connect succeeded"),
        Err(e) => debug!(error = %e, "Probe connect failed"),
    }
    if let Err(e) = tag.close().await {
        debug!(error = %e, "Probe close failed");
    }
}

async fn run<T: NfcTag>(tag: T, family: ChipFamily, request: &ScanRequest) -> ScanResult {
    let mut session = match TagSession::open(tag, family).await {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "Could not open tag session");
            return e.into_failure().into();
        }
    };

    let outcome = operations::execute(&mut session, request).await;
    if let Err(e) = session.close().await {
        debug!(error = %e, "Closing tag session failed");
    }

    match outcome {
        Ok(result) => result,
        Err(e) => {
            let failure = e.into_failure();
            warn!(request = %request, failure = %failure, "Scan failed");
            failure.into()
        }
    }
}
