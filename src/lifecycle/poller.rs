//! Per-job polling loops.
//!
//! At most one loop is live per guid. Replacing a loop cancels the previous
//! token before the new one is handed out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::AlignerApi;
use crate::model::{JobEvent, StopReason};
use crate::registry::JobRegistry;

struct Slot {
    id: u64,
    token: CancellationToken,
    /// False while the slot only reserves the job for an in-flight request.
    live: bool,
}

#[derive(Default)]
pub(crate) struct Pollers {
    slots: Mutex<HashMap<String, Slot>>,
    next_id: Mutex<u64>,
}

impl Pollers {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, guid: &str, live: bool) -> (u64, CancellationToken) {
        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            *next
        };
        let token = CancellationToken::new();
        let slot = Slot {
            id,
            token: token.clone(),
            live,
        };
        if let Some(prev) = self.lock().insert(guid.to_string(), slot) {
            debug!(guid, prev_id = prev.id, id, live, "replacing polling slot");
            prev.token.cancel();
        }
        (id, token)
    }

    /// Hand out a fresh live token for `guid`, cancelling any previous one.
    pub(crate) fn replace(&self, guid: &str) -> (u64, CancellationToken) {
        self.insert(guid, true)
    }

    /// Like [`Pollers::replace`], but the slot does not count as polling until
    /// [`Pollers::activate`] succeeds. Cancelling `guid` in between revokes it.
    pub(crate) fn reserve(&self, guid: &str) -> (u64, CancellationToken) {
        self.insert(guid, false)
    }

    /// Turn reservation `id` into a live loop. Fails if it was cancelled or replaced.
    pub(crate) fn activate(&self, guid: &str, id: u64) -> bool {
        match self.lock().get_mut(guid) {
            Some(slot) if slot.id == id && !slot.token.is_cancelled() => {
                slot.live = true;
                true
            }
            _ => false,
        }
    }

    /// Cancel the loop or reservation for `guid`, if any.
    pub(crate) fn cancel(&self, guid: &str) -> bool {
        match self.lock().remove(guid) {
            Some(slot) => {
                slot.token.cancel();
                slot.live
            }
            None => false,
        }
    }

    pub(crate) fn cancel_all(&self) {
        for (_, slot) in self.lock().drain() {
            slot.token.cancel();
        }
    }

    pub(crate) fn is_active(&self, guid: &str) -> bool {
        self.lock()
            .get(guid)
            .is_some_and(|slot| slot.live && !slot.token.is_cancelled())
    }

    /// Drop the slot for `guid` only if it still belongs to `id`.
    pub(crate) fn finish(&self, guid: &str, id: u64) {
        let mut slots = self.lock();
        if slots.get(guid).is_some_and(|slot| slot.id == id) {
            slots.remove(guid);
        }
    }
}

pub(crate) struct PollTask {
    pub guid: String,
    pub interval: Duration,
    pub api: Arc<dyn AlignerApi>,
    pub registry: Arc<JobRegistry>,
    pub events: Option<UnboundedSender<JobEvent>>,
    pub token: CancellationToken,
}

impl PollTask {
    /// Fetch one snapshot per interval until cancelled or a fetch fails.
    /// A fetch that completes after cancellation is discarded.
    pub(crate) async fn run(self) -> StopReason {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the first fetch is one interval out.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return StopReason::Cancelled,
                _ = ticker.tick() => {}
            }

            match self.api.progress(&self.guid).await {
                Ok(job) => {
                    let snapshot = job.clone();
                    let stored = self
                        .registry
                        .apply_snapshot_if(job, || !self.token.is_cancelled());
                    if !stored {
                        debug!(guid = %self.guid, "discarding snapshot fetched after cancellation");
                        return StopReason::Cancelled;
                    }
                    debug!(
                        guid = %self.guid,
                        state = %snapshot.state,
                        curr = snapshot.curr_batches,
                        total = snapshot.total_batches,
                        "poll tick"
                    );
                    if let Some(tx) = &self.events {
                        let _ = tx.send(JobEvent::Snapshot {
                            job: Box::new(snapshot),
                        });
                    }
                }
                Err(e) => {
                    if self.token.is_cancelled() {
                        return StopReason::Cancelled;
                    }
                    warn!(guid = %self.guid, error = %e, "progress fetch failed, polling stopped");
                    return StopReason::FetchFailed(e.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_cancels_previous_token() {
        let pollers = Pollers::default();
        let (first_id, first) = pollers.replace("g1");
        let (second_id, second) = pollers.replace("g1");
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_ne!(first_id, second_id);
        assert!(pollers.is_active("g1"));

        // A stale loop finishing must not clear the newer slot.
        pollers.finish("g1", first_id);
        assert!(pollers.is_active("g1"));
        pollers.finish("g1", second_id);
        assert!(!pollers.is_active("g1"));
    }

    #[test]
    fn cancel_is_scoped_to_one_job() {
        let pollers = Pollers::default();
        let (_, a) = pollers.replace("a");
        let (_, b) = pollers.replace("b");
        assert!(pollers.cancel("a"));
        assert!(!pollers.cancel("a"));
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        pollers.cancel_all();
        assert!(b.is_cancelled());
        assert!(!pollers.is_active("b"));
    }

    #[test]
    fn reservation_is_not_polling_and_can_be_revoked() {
        let pollers = Pollers::default();
        let (id, token) = pollers.reserve("g1");
        assert!(!pollers.is_active("g1"));
        assert!(!pollers.cancel("g1"));
        assert!(token.is_cancelled());
        assert!(!pollers.activate("g1", id));
        assert!(!pollers.is_active("g1"));

        let (stale, _) = pollers.reserve("g1");
        let (fresh, _) = pollers.reserve("g1");
        assert!(!pollers.activate("g1", stale));
        assert!(pollers.activate("g1", fresh));
        assert!(pollers.is_active("g1"));
    }
}
