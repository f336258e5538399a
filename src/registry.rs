//! Local owner of job snapshots.
//!
//! Every snapshot written here comes from the server, with one exception: the
//! lifecycle controller may mark a job optimistically `IN_PROGRESS`. The last
//! confirmed snapshot is kept alongside so the optimistic state can be undone.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::api::AlignerApi;
use crate::error::{AlignError, Result};
use crate::model::{Direction, Job, JobState, NewJob};

#[derive(Debug, Clone)]
pub struct TrackedJob {
    job: Job,
    confirmed: Job,
    optimistic: bool,
    synced_at: OffsetDateTime,
}

impl TrackedJob {
    fn confirmed(job: Job) -> Self {
        Self {
            confirmed: job.clone(),
            job,
            optimistic: false,
            synced_at: OffsetDateTime::now_utc(),
        }
    }

    /// Take a new server snapshot but keep showing the optimistic state.
    fn reconfirmed(mut self, job: Job) -> Self {
        let shown = self.job.state;
        self.job = job.clone();
        self.job.state = shown;
        self.confirmed = job;
        self.synced_at = OffsetDateTime::now_utc();
        self
    }

    /// What the UI should show, including an optimistic state.
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Last snapshot the server confirmed.
    pub fn confirmed_job(&self) -> &Job {
        &self.confirmed
    }

    pub fn is_optimistic(&self) -> bool {
        self.optimistic
    }

    pub fn synced_at(&self) -> OffsetDateTime {
        self.synced_at
    }
}

pub struct JobRegistry {
    api: Arc<dyn AlignerApi>,
    jobs: RwLock<BTreeMap<String, TrackedJob>>,
}

impl JobRegistry {
    pub fn new(api: Arc<dyn AlignerApi>) -> Self {
        Self {
            api,
            jobs: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn api(&self) -> &Arc<dyn AlignerApi> {
        &self.api
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, TrackedJob>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, TrackedJob>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the tracked set with the server's job list.
    pub async fn refresh_all(&self) -> Result<Vec<Job>> {
        let jobs: Vec<Job> = self
            .api
            .list_jobs()
            .await?
            .into_iter()
            .filter(|j| !j.is_deleted)
            .collect();
        let mut map = self.write();
        let previous = std::mem::take(&mut *map);
        for job in &jobs {
            check_snapshot(job);
            let tracked = match previous.get(&job.guid) {
                Some(prev) if prev.optimistic => prev.clone().reconfirmed(job.clone()),
                _ => TrackedJob::confirmed(job.clone()),
            };
            map.insert(job.guid.clone(), tracked);
        }
        debug!(count = jobs.len(), "job list refreshed");
        Ok(jobs)
    }

    /// Fetch one job's snapshot and start tracking it. A pending optimistic
    /// state stays visible; only the confirmed snapshot moves.
    pub async fn load(&self, guid: &str) -> Result<Job> {
        let job = self.api.progress(guid).await?;
        self.confirm(job.clone());
        Ok(job)
    }

    pub async fn create(&self, new: &NewJob) -> Result<Job> {
        if new.name.trim().is_empty() {
            return Err(AlignError::InvalidArgument("job name is empty".into()));
        }
        let job = self.api.create_job(new).await?;
        info!(guid = %job.guid, name = %job.name, "job created");
        self.apply_snapshot(job.clone());
        Ok(job)
    }

    /// Delete on the server, then drop the local entry.
    pub async fn delete(&self, guid: &str) -> Result<()> {
        self.api.delete_job(guid).await?;
        self.forget(guid);
        info!(guid, "job deleted");
        Ok(())
    }

    /// Upload a proxy document and return the refreshed snapshot.
    pub async fn upload_proxy(
        &self,
        guid: &str,
        direction: Direction,
        file_name: &str,
        bytes: Bytes,
    ) -> Result<Job> {
        self.api
            .upload_proxy(guid, direction, file_name, bytes)
            .await?;
        self.load(guid).await
    }

    pub fn get(&self, guid: &str) -> Option<Job> {
        self.read().get(guid).map(|t| t.job.clone())
    }

    pub fn tracked(&self, guid: &str) -> Option<TrackedJob> {
        self.read().get(guid).cloned()
    }

    pub fn contains(&self, guid: &str) -> bool {
        self.read().contains_key(guid)
    }

    pub fn list(&self) -> Vec<Job> {
        self.read().values().map(|t| t.job.clone()).collect()
    }

    /// Replace the snapshot wholesale with a server response.
    pub fn apply_snapshot(&self, job: Job) {
        let mut map = self.write();
        Self::store(&mut map, job);
    }

    /// Record a server snapshot as confirmed without clearing a pending
    /// optimistic state.
    pub fn confirm(&self, job: Job) {
        let mut map = self.write();
        match map.get(&job.guid) {
            Some(prev) if prev.optimistic => {
                check_snapshot(&job);
                debug!(
                    guid = %job.guid,
                    state = %job.state,
                    "snapshot confirmed behind optimistic state"
                );
                let tracked = prev.clone().reconfirmed(job);
                map.insert(tracked.confirmed.guid.clone(), tracked);
            }
            _ => Self::store(&mut map, job),
        }
    }

    /// Same as [`JobRegistry::apply_snapshot`], but only if `still_current`
    /// holds while the write lock is held. Returns whether the snapshot was stored.
    pub fn apply_snapshot_if(&self, job: Job, still_current: impl FnOnce() -> bool) -> bool {
        let mut map = self.write();
        if !still_current() {
            return false;
        }
        Self::store(&mut map, job);
        true
    }

    fn store(map: &mut BTreeMap<String, TrackedJob>, job: Job) {
        check_snapshot(&job);
        if let Some(prev) = map.get(&job.guid) {
            if !prev.confirmed.state.is_forward(job.state) {
                debug!(
                    guid = %job.guid,
                    from = %prev.confirmed.state,
                    to = %job.state,
                    "server moved job outside the forward path"
                );
            }
        }
        map.insert(job.guid.clone(), TrackedJob::confirmed(job));
    }

    /// Show `state` before the server confirms it. Returns the confirmed state.
    pub fn mark_optimistic(&self, guid: &str, state: JobState) -> Result<JobState> {
        let mut map = self.write();
        let tracked = map
            .get_mut(guid)
            .ok_or_else(|| AlignError::UnknownJob(guid.to_string()))?;
        tracked.job.state = state;
        tracked.optimistic = true;
        Ok(tracked.confirmed.state)
    }

    /// Restore the last confirmed snapshot. Returns the restored state if the
    /// job was in an optimistic state.
    pub fn rollback(&self, guid: &str) -> Option<JobState> {
        let mut map = self.write();
        let tracked = map.get_mut(guid)?;
        if !tracked.optimistic {
            return None;
        }
        tracked.job = tracked.confirmed.clone();
        tracked.optimistic = false;
        Some(tracked.job.state)
    }

    pub fn forget(&self, guid: &str) {
        self.write().remove(guid);
    }
}

fn check_snapshot(job: &Job) {
    if !job.progress_is_consistent() {
        warn!(
            guid = %job.guid,
            curr = job.curr_batches,
            total = job.total_batches,
            "server snapshot reports more finished batches than exist"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{connect, Generation};
    use crate::transport::testing::CannedTransport;
    use serde_json::json;

    fn job(guid: &str, state: u8) -> serde_json::Value {
        json!({"id": 1, "guid": guid, "name": "t", "state": state,
               "curr_batches": 2, "total_batches": 5})
    }

    fn registry() -> (Arc<CannedTransport>, JobRegistry) {
        let t = CannedTransport::new();
        let reg = JobRegistry::new(connect(Generation::Current, t.clone()));
        (t, reg)
    }

    #[tokio::test]
    async fn optimistic_state_rolls_back_to_confirmed() {
        let (t, reg) = registry();
        t.push_json(job("g1", 2));
        reg.load("g1").await.unwrap();

        let confirmed = reg.mark_optimistic("g1", JobState::InProgress).unwrap();
        assert_eq!(confirmed, JobState::InProgressDone);
        let tracked = reg.tracked("g1").unwrap();
        assert!(tracked.is_optimistic());
        assert_eq!(tracked.job().state, JobState::InProgress);
        assert_eq!(tracked.confirmed_job().state, JobState::InProgressDone);

        assert_eq!(reg.rollback("g1"), Some(JobState::InProgressDone));
        assert_eq!(reg.get("g1").unwrap().state, JobState::InProgressDone);
        assert_eq!(reg.rollback("g1"), None);
    }

    #[tokio::test]
    async fn load_keeps_a_pending_optimistic_state() {
        let (t, reg) = registry();
        t.push_json(job("g1", 0));
        reg.load("g1").await.unwrap();
        reg.mark_optimistic("g1", JobState::InProgress).unwrap();

        let mut newer = job("g1", 0);
        newer["name"] = json!("renamed");
        t.push_json(newer);
        reg.load("g1").await.unwrap();

        let tracked = reg.tracked("g1").unwrap();
        assert!(tracked.is_optimistic());
        assert_eq!(tracked.job().state, JobState::InProgress);
        assert_eq!(tracked.job().name, "renamed");
        assert_eq!(tracked.confirmed_job().name, "renamed");
        assert_eq!(reg.rollback("g1"), Some(JobState::Init));
        assert_eq!(reg.get("g1").unwrap().name, "renamed");
    }

    #[test]
    fn unknown_job_cannot_be_marked() {
        let (_, reg) = registry();
        let err = reg.mark_optimistic("nope", JobState::InProgress).unwrap_err();
        assert!(matches!(err, AlignError::UnknownJob(g) if g == "nope"));
    }

    #[tokio::test]
    async fn refresh_all_replaces_and_skips_deleted() {
        let (t, reg) = registry();
        t.push_json(job("old", 3));
        reg.load("old").await.unwrap();

        let mut deleted = job("gone", 3);
        deleted["is_deleted"] = json!(true);
        t.push_json(json!([job("a", 0), deleted]));
        let jobs = reg.refresh_all().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(reg.contains("a"));
        assert!(!reg.contains("old"));
        assert!(!reg.contains("gone"));
    }

    #[tokio::test]
    async fn delete_forgets_the_job_only_after_the_server_agrees() {
        let (t, reg) = registry();
        t.push_json(job("g1", 3));
        reg.load("g1").await.unwrap();

        t.push_error(500, "locked");
        assert!(reg.delete("g1").await.is_err());
        assert!(reg.contains("g1"));

        reg.delete("g1").await.unwrap();
        assert!(!reg.contains("g1"));
        assert_eq!(t.requests()[2].path, "/api/aligner/alignments/g1");
    }

    #[test]
    fn guarded_apply_skips_when_no_longer_current() {
        let (_, reg) = registry();
        let snapshot: Job = serde_json::from_value(job("g1", 1)).unwrap();
        assert!(!reg.apply_snapshot_if(snapshot.clone(), || false));
        assert!(!reg.contains("g1"));
        assert!(reg.apply_snapshot_if(snapshot, || true));
        assert!(reg.contains("g1"));
    }

    #[tokio::test]
    async fn proxy_upload_reloads_the_snapshot() {
        let (t, reg) = registry();
        t.push_json(json!({"status": "ok"}));
        let mut loaded = job("g1", 2);
        loaded["proxy_to_loaded"] = json!(true);
        t.push_json(loaded);

        let job = reg
            .upload_proxy("g1", Direction::To, "proxy.txt", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(job.proxy_loaded(Direction::To));
        assert!(!job.proxy_loaded(Direction::From));
        assert_eq!(
            t.upload_paths(),
            vec!["/api/aligner/alignments/g1/proxy/to".to_string()]
        );
        assert!(reg.get("g1").unwrap().proxy_to_loaded);
    }

    #[tokio::test]
    async fn empty_name_is_rejected_locally() {
        let (t, reg) = registry();
        let err = reg
            .create(&NewJob {
                name: "  ".into(),
                document_from_guid: "a".into(),
                document_to_guid: "b".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AlignError::InvalidArgument(_)));
        assert!(t.requests().is_empty());
    }
}
