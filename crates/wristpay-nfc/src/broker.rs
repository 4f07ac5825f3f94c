//! Single-request mailbox between the application and the tag dispatcher.
//!
//! The application calls [`ScanBroker::scan`] and waits; the dispatcher,
//! running on the reader's presence loop, takes the request with
//! [`take_request`](ScanBroker::take_request) and answers it with
//! [`complete`](ScanBroker::complete).
//!
//! ```text
//!   scan()                       dispatcher
//!   ──────                       ──────────
//!   clear result
//!   publish request  ─────────►  take_request()     (at most once)
//!   wait ...                     execute on the tag
//!   ◄──────────────────────────  complete(ticket, result)
//!   return result
//! ```
//!
//! Both slots live behind one mutex so each side's two-step transition is
//! atomic. Every request carries a ticket; a result is only handed to the
//! caller waiting on the same ticket. Dropping the `scan` future retracts
//! the request, so a later presence never serves a cancelled caller.

use crate::error::BrokerError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, watch};
use tracing::{debug, info};
use wristpay_core::{ScanRequest, ScanResult};

/// Identifies one `scan` call.
pub type Ticket = u64;

/// Latest broker state, for passive status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScanStatus {
    Idle,
    /// A caller waits for a tag; carries the request name.
    Waiting { request: &'static str },
    Completed {
        result: ScanResult,
        at: DateTime<Utc>,
    },
}

struct PendingScan {
    ticket: Ticket,
    request: ScanRequest,
}

#[derive(Default)]
struct Slots {
    next_ticket: Ticket,
    /// Ticket of the caller currently inside `scan`.
    waiting: Option<Ticket>,
    request: Option<PendingScan>,
    result: Option<(Ticket, ScanResult)>,
}

pub struct ScanBroker {
    slots: Mutex<Slots>,
    notify: Notify,
    status: watch::Sender<ScanStatus>,
}

impl ScanBroker {
    pub fn new() -> Self {
        let (status, _) = watch::channel(ScanStatus::Idle);
        Self {
            slots: Mutex::new(Slots::default()),
            notify: Notify::new(),
            status,
        }
    }

    /// Publish `request` and wait for the result of the tag that serves it.
    ///
    /// There is no timeout; drop the future to cancel, which retracts the
    /// request.
    ///
    /// # Errors
    /// [`BrokerError::RequestPending`] if another caller is still waiting.
    /// Its request is left untouched.
    pub async fn scan(&self, request: ScanRequest) -> Result<ScanResult, BrokerError> {
        let ticket = {
            let mut slots = self.slots.lock();
            if slots.waiting.is_some() {
                return Err(BrokerError::RequestPending);
            }
            slots.next_ticket += 1;
            let ticket = slots.next_ticket;

            slots.result = None;
            slots.waiting = Some(ticket);
            debug!(ticket, request = %request, "Scan request published");
            self.status.send_replace(ScanStatus::Waiting {
                request: request.name(),
            });
            slots.request = Some(PendingScan { ticket, request });
            ticket
        };

        let _guard = WaitGuard {
            broker: self,
            ticket,
        };
        loop {
            if let Some(result) = self.try_take_result(ticket) {
                return Ok(result);
            }
            self.notify.notified().await;
        }
    }

    /// Take the pending request, if any. A request is handed out once.
    pub fn take_request(&self) -> Option<(Ticket, ScanRequest)> {
        let pending = self.slots.lock().request.take()?;
        debug!(ticket = pending.ticket, request = %pending.request, "Scan request taken");
        Some((pending.ticket, pending.request))
    }

    /// Answer the request identified by `ticket`.
    ///
    /// If its caller is gone the result only updates the status.
    pub fn complete(&self, ticket: Ticket, result: ScanResult) {
        let mut slots = self.slots.lock();
        if slots.request.as_ref().is_some_and(|p| p.ticket == ticket) {
            slots.request = None;
        }
        if slots.waiting == Some(ticket) {
            info!(ticket, failed = result.is_fail(), "Scan result published");
            slots.result = Some((ticket, result.clone()));
            self.notify.notify_one();
        } else {
            debug!(ticket, "Result for a retracted request discarded");
        }
        self.publish_status(result);
    }

    /// Publish a result that answers whatever request is outstanding.
    ///
    /// Any request still in its slot is cleared, since the result supersedes
    /// it. Used for tags rejected before a request was taken.
    pub fn publish_result(&self, result: ScanResult) {
        let mut slots = self.slots.lock();
        slots.request = None;
        if let Some(ticket) = slots.waiting {
            info!(ticket, failed = result.is_fail(), "Scan result published");
            slots.result = Some((ticket, result.clone()));
            self.notify.notify_one();
        }
        self.publish_status(result);
    }

    /// Returns `true` while a request waits for a tag.
    pub fn has_pending_request(&self) -> bool {
        self.slots.lock().request.is_some()
    }

    /// Returns `true` while a caller is inside [`scan`](Self::scan).
    pub fn is_waiting(&self) -> bool {
        self.slots.lock().waiting.is_some()
    }

    /// Read-only view of the latest status.
    pub fn subscribe(&self) -> watch::Receiver<ScanStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> ScanStatus {
        self.status.borrow().clone()
    }

    fn publish_status(&self, result: ScanResult) {
        self.status.send_replace(ScanStatus::Completed {
            result,
            at: Utc::now(),
        });
    }

    fn try_take_result(&self, ticket: Ticket) -> Option<ScanResult> {
        let mut slots = self.slots.lock();
        match slots.result.take() {
            Some((owner, result)) if owner == ticket => {
                slots.waiting = None;
                Some(result)
            }
            other => {
                slots.result = other;
                None
            }
        }
    }
}

impl Default for ScanBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScanBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.lock();
        f.debug_struct("ScanBroker")
            .field("waiting", &slots.waiting)
            .field("request", &slots.request.as_ref().map(|p| p.request.name()))
            .field("has_result", &slots.result.is_some())
            .finish()
    }
}

/// Retracts the caller's request when `scan` is dropped before its result
/// arrived.
struct WaitGuard<'a> {
    broker: &'a ScanBroker,
    ticket: Ticket,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.broker.slots.lock();
        if slots.waiting != Some(self.ticket) {
            return;
        }
        slots.waiting = None;
        if slots.request.as_ref().is_some_and(|p| p.ticket == self.ticket) {
            slots.request = None;
        }
        if slots.result.as_ref().is_some_and(|(owner, _)| *owner == self.ticket) {
            slots.result = None;
        }
        debug!(ticket = self.ticket, "Scan cancelled, request retracted");
        self.broker.status.send_replace(ScanStatus::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::Arc;
    use wristpay_core::{ScanFailure, Uid};

    #[tokio::test]
    async fn test_scan_waits_for_completion() {
        let broker = Arc::new(ScanBroker::new());
        let waiter = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.scan(ScanRequest::FastRead).await })
        };
        tokio::task::yield_now().await;
        while !broker.has_pending_request() {
            tokio::task::yield_now().await;
        }

        let (ticket, request) = broker.take_request().unwrap();
        assert_eq!(request, ScanRequest::FastRead);
        assert!(broker.take_request().is_none());

        broker.complete(ticket, ScanResult::FastRead(Uid::new(7)));
        assert_eq!(
            waiter.await.unwrap().unwrap(),
            ScanResult::FastRead(Uid::new(7))
        );
        assert!(!broker.is_waiting());
    }

    #[test]
    fn test_second_scan_is_rejected() {
        let broker = ScanBroker::new();
        let mut first = Box::pin(broker.scan(ScanRequest::FastRead));
        assert!((&mut first).now_or_never().is_none());

        let second = broker.scan(ScanRequest::FastRead).now_or_never();
        assert_eq!(second, Some(Err(BrokerError::RequestPending)));
        assert!(broker.has_pending_request());
        drop(first);
        assert!(!broker.has_pending_request());
    }

    #[test]
    fn test_dropped_scan_retracts_request() {
        let broker = ScanBroker::new();
        let mut status = broker.subscribe();
        {
            let mut scan = Box::pin(broker.scan(ScanRequest::FastRead));
            assert!((&mut scan).now_or_never().is_none());
            assert_eq!(
                *status.borrow_and_update(),
                ScanStatus::Waiting {
                    request: "FastRead"
                }
            );
        }
        assert!(broker.take_request().is_none());
        assert_eq!(*status.borrow(), ScanStatus::Idle);
    }

    #[test]
    fn test_late_result_is_not_delivered_to_next_caller() {
        let broker = ScanBroker::new();
        let stale = {
            let mut scan = Box::pin(broker.scan(ScanRequest::FastRead));
            assert!((&mut scan).now_or_never().is_none());
            broker.take_request().unwrap().0
        };

        let mut next = Box::pin(broker.scan(ScanRequest::FastRead));
        assert!((&mut next).now_or_never().is_none());
        broker.complete(stale, ScanResult::Write);
        assert!((&mut next).now_or_never().is_none());
        assert!(broker.has_pending_request());
        assert!(matches!(
            broker.status(),
            ScanStatus::Completed {
                result: ScanResult::Write,
                ..
            }
        ));
    }

    #[test]
    fn test_publish_result_supersedes_request() {
        let broker = ScanBroker::new();
        let mut scan = Box::pin(broker.scan(ScanRequest::FastRead));
        assert!((&mut scan).now_or_never().is_none());

        let failure = ScanResult::Fail(ScanFailure::Incompatible("tag not supported".into()));
        broker.publish_result(failure.clone());
        assert!(!broker.has_pending_request());
        assert_eq!((&mut scan).now_or_never(), Some(Ok(failure)));
    }

    #[test]
    fn test_result_without_caller_only_updates_status() {
        let broker = ScanBroker::new();
        broker.publish_result(ScanResult::Write);
        assert!(!broker.is_waiting());
        assert!(matches!(broker.status(), ScanStatus::Completed { .. }));
    }
}
