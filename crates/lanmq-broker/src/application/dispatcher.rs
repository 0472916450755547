//! Publish fan-out.
//!
//! One encoded frame is shared by every recipient (`Bytes` clones are
//! reference-counted), and each recipient gets a non-blocking enqueue.  No
//! lock is held here: the subscriber list is a snapshot taken beforehand.

use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use crate::application::handle::{Delivery, SessionHandle};
use crate::domain::SessionId;

/// What happened to one published message.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Subscribers in the snapshot, not counting the publisher itself.
    pub matched: usize,
    /// Frames placed in an outbound queue.
    pub delivered: usize,
    /// Frames discarded because the subscriber's queue was full.
    pub dropped: usize,
    /// Subscribers whose writer is gone; the caller tears these down.
    pub gone: Vec<Arc<SessionHandle>>,
}

/// Enqueues `frame` for every subscriber except `publisher`.
///
/// Never blocks and never fails: at-most-once delivery means a full or
/// closed queue simply loses the message.
pub fn fan_out(
    subscribers: &[Arc<SessionHandle>],
    publisher: SessionId,
    frame: &Bytes,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    for subscriber in subscribers.iter().filter(|s| s.id() != publisher) {
        report.matched += 1;
        match subscriber.deliver(frame.clone()) {
            Delivery::Queued => report.delivered += 1,
            Delivery::Dropped => {
                report.dropped += 1;
                warn!(
                    session_id = %subscriber.id(),
                    client_id = subscriber.client_id().unwrap_or("-"),
                    "outbound queue full; message dropped"
                );
            }
            Delivery::Gone => report.gone.push(Arc::clone(subscriber)),
        }
    }

    report
}
