//! Lifecycle controller.
//!
//! Owns start/extend/stop orchestration and emits events for presentation layers.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::poller::{PollTask, Pollers};
use crate::api::{AlignOp, AlignerApi};
use crate::error::{AlignError, Result};
use crate::model::{AlignOptions, InfoEvent, Job, JobEvent, JobState, StopReason};
use crate::registry::JobRegistry;

struct Inner {
    registry: Arc<JobRegistry>,
    api: Arc<dyn AlignerApi>,
    events: Option<UnboundedSender<JobEvent>>,
    interval: Duration,
    pollers: Pollers,
}

/// Cheap to clone; clones share the same polling loops.
#[derive(Clone)]
pub struct JobController {
    inner: Arc<Inner>,
}

impl JobController {
    pub fn new(registry: Arc<JobRegistry>, poll_interval: Duration) -> Self {
        Self::build(registry, poll_interval, None)
    }

    pub fn with_events(
        registry: Arc<JobRegistry>,
        poll_interval: Duration,
        events: UnboundedSender<JobEvent>,
    ) -> Self {
        Self::build(registry, poll_interval, Some(events))
    }

    fn build(
        registry: Arc<JobRegistry>,
        interval: Duration,
        events: Option<UnboundedSender<JobEvent>>,
    ) -> Self {
        let api = registry.api().clone();
        Self {
            inner: Arc::new(Inner {
                registry,
                api,
                events,
                interval,
                pollers: Pollers::default(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.inner.registry
    }

    fn emit(&self, event: JobEvent) {
        if let Some(tx) = &self.inner.events {
            let _ = tx.send(event);
        }
    }

    fn ensure_tracked(&self, guid: &str) -> Result<()> {
        if self.inner.registry.contains(guid) {
            Ok(())
        } else {
            Err(AlignError::UnknownJob(guid.to_string()))
        }
    }

    /// Start alignment. The job shows `IN_PROGRESS` until the server says otherwise.
    pub async fn start(&self, guid: &str, opts: &AlignOptions) -> Result<()> {
        self.run_optimistic(AlignOp::Start, guid, opts).await
    }

    /// Request more batches ("align next").
    pub async fn extend(&self, guid: &str, opts: &AlignOptions) -> Result<()> {
        self.run_optimistic(AlignOp::Extend, guid, opts).await
    }

    async fn run_optimistic(&self, op: AlignOp, guid: &str, opts: &AlignOptions) -> Result<()> {
        self.ensure_tracked(guid)?;
        self.report_ignored(op, opts);

        // Reserving the slot cancels the previous loop, so none of its ticks can
        // overwrite the optimistic state. A stop or a newer start revokes it.
        let (id, token) = self.inner.pollers.reserve(guid);
        let confirmed = self
            .inner
            .registry
            .mark_optimistic(guid, JobState::InProgress)?;
        info!(guid, operation = op.as_str(), from = %confirmed, "optimistic IN_PROGRESS");
        self.emit(JobEvent::Info(InfoEvent::Optimistic {
            guid: guid.to_string(),
            state: JobState::InProgress,
        }));

        let sent = match op {
            AlignOp::Start => self.inner.api.start(guid, opts).await,
            AlignOp::Extend => self.inner.api.extend(guid, opts).await,
        };
        match sent {
            Ok(()) => {
                if self.inner.pollers.activate(guid, id) {
                    self.spawn_loop(guid, id, token);
                } else {
                    info!(
                        guid,
                        operation = op.as_str(),
                        "superseded while in flight, not polling"
                    );
                }
                Ok(())
            }
            Err(e) => {
                self.inner.pollers.finish(guid, id);
                if token.is_cancelled() {
                    // A stop or a newer request already owns the snapshot.
                    warn!(
                        guid,
                        operation = op.as_str(),
                        error = %e,
                        "superseded request failed"
                    );
                    return Err(e);
                }
                warn!(guid, operation = op.as_str(), error = %e, "request failed, rolling back");
                if let Some(state) = self.inner.registry.rollback(guid) {
                    self.emit(JobEvent::Info(InfoEvent::RolledBack {
                        guid: guid.to_string(),
                        state,
                    }));
                }
                Err(e)
            }
        }
    }

    fn report_ignored(&self, op: AlignOp, opts: &AlignOptions) {
        let Ok(serde_json::Value::Object(set)) = serde_json::to_value(opts) else {
            return;
        };
        let accepted = self.inner.api.accepted_options(op);
        let ignored: Vec<String> = set
            .keys()
            .filter(|k| !accepted.contains(&k.as_str()))
            .cloned()
            .collect();
        if !ignored.is_empty() {
            self.emit(JobEvent::Info(InfoEvent::IgnoredOptions {
                operation: op.as_str(),
                options: ignored,
            }));
        }
    }

    /// Stop alignment: halt polling, request the stop, then fetch one
    /// authoritative snapshot. No optimistic state survives this call, and a
    /// start or extend still in flight will not resume polling afterwards.
    pub async fn stop(&self, guid: &str) -> Result<Job> {
        self.ensure_tracked(guid)?;
        self.cancel_polling(guid);
        let requested = self.inner.api.stop(guid).await;
        if let Err(e) = requested {
            self.inner.registry.rollback(guid);
            return Err(e);
        }
        info!(guid, "stop requested");

        match self.inner.api.progress(guid).await {
            Ok(job) => {
                self.inner.registry.apply_snapshot(job.clone());
                self.emit(JobEvent::Snapshot {
                    job: Box::new(job.clone()),
                });
                Ok(job)
            }
            Err(e) => {
                self.inner.registry.rollback(guid);
                Err(e)
            }
        }
    }

    /// One-shot authoritative fetch outside the polling loop. A pending
    /// optimistic state stays visible until its request resolves.
    pub async fn refresh(&self, guid: &str) -> Result<Job> {
        let job = self.inner.registry.load(guid).await?;
        self.emit(JobEvent::Snapshot {
            job: Box::new(job.clone()),
        });
        Ok(job)
    }

    /// Start (or restart) the polling loop for `guid`.
    pub fn start_polling(&self, guid: &str) {
        let (id, token) = self.inner.pollers.replace(guid);
        self.spawn_loop(guid, id, token);
    }

    fn spawn_loop(&self, guid: &str, id: u64, token: CancellationToken) {
        let task = PollTask {
            guid: guid.to_string(),
            interval: self.inner.interval,
            api: self.inner.api.clone(),
            registry: self.inner.registry.clone(),
            events: self.inner.events.clone(),
            token,
        };
        self.emit(JobEvent::PollingStarted {
            guid: guid.to_string(),
        });
        info!(guid, interval = ?self.inner.interval, "polling started");

        let this = self.clone();
        let guid = guid.to_string();
        tokio::spawn(async move {
            let reason = task.run().await;
            this.inner.pollers.finish(&guid, id);
            if let StopReason::FetchFailed(err) = &reason {
                this.emit(JobEvent::Info(InfoEvent::Message(format!(
                    "{guid}: polling stopped after a failed fetch: {err}"
                ))));
            }
            this.emit(JobEvent::PollingStopped { guid, reason });
        });
    }

    /// Cancel the polling loop for `guid`, or revoke the reservation of an
    /// in-flight start/extend. Returns whether a loop was live.
    pub fn cancel_polling(&self, guid: &str) -> bool {
        self.inner.pollers.cancel(guid)
    }

    pub fn is_polling(&self, guid: &str) -> bool {
        self.inner.pollers.is_active(guid)
    }

    /// Cancel every polling loop.
    pub fn shutdown(&self) {
        self.inner.pollers.cancel_all();
    }
}
