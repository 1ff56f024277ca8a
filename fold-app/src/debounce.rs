//! Quiet-period timers, one per live request id.
//!
//! Each timer moves `Scheduled -> Fired` or `Scheduled -> Cancelled`; both
//! states are terminal and drop the handle. A fire does not dispatch by
//! itself: it enqueues `EngineEvent::Fire` into the same single-consumer
//! queue that carries inbound messages, so a fire and a merge for one owner
//! are totally ordered by queue arrival. A fire that was already queued when
//! a merge retired its id loses at the store: `take` rejects the stale id.

use crate::engine::EngineEvent;
use crate::store::RequestId;
use dashmap::DashMap;
use fold_channels::SenderId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct DebounceScheduler {
    handles: Arc<DashMap<RequestId, CancellationToken>>,
    quiet_period: Duration,
    events_tx: mpsc::Sender<EngineEvent>,
}

impl DebounceScheduler {
    pub fn new(quiet_period: Duration, events_tx: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            handles: Arc::new(DashMap::new()),
            quiet_period,
            events_tx,
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Start a timer for `request_id`. When the quiet period elapses without
    /// cancellation, the handle self-retires and exactly one `Fire` event is
    /// sent for this id.
    pub fn schedule(&self, owner: SenderId, request_id: RequestId) {
        let token = CancellationToken::new();
        if let Some(stale) = self
            .handles
            .insert(request_id.clone(), token.clone())
        {
            // A merge always cancels the old id before scheduling the new
            // one, so a live handle under the same id means a duplicate
            // schedule call. Retire the older timer.
            tracing::warn!(%request_id, "replacing live timer for the same request id");
            stale.cancel();
        }

        let handles = Arc::clone(&self.handles);
        let events_tx = self.events_tx.clone();
        let quiet_period = self.quiet_period;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(%request_id, "timer cancelled");
                }
                _ = tokio::time::sleep(quiet_period) => {
                    handles.remove(&request_id);
                    tracing::debug!(%request_id, "quiet period elapsed");
                    if events_tx
                        .send(EngineEvent::Fire { owner, request_id })
                        .await
                        .is_err()
                    {
                        tracing::warn!("engine queue closed; dropping fire event");
                    }
                }
            }
        });
    }

    /// Cancel the timer for `request_id`, if one is still scheduled. Unknown
    /// and already-fired ids are a no-op, never an error.
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        match self.handles.remove(request_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    fn scheduled_count(&self) -> usize {
        self.handles.len()
    }
}
