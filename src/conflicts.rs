//! Unresolved conflicts of one job.
//!
//! The list is never patched locally: a resolution can cascade on the server,
//! so every accepted resolution is followed by a fresh list fetch.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::AlignerApi;
use crate::error::{AlignError, Result};
use crate::model::{Conflict, ConflictDetail, EdgeHandling, Resolution};

pub struct ConflictWorkspace {
    api: Arc<dyn AlignerApi>,
    guid: String,
    edges: EdgeHandling,
    conflicts: Option<Vec<Conflict>>,
    details: HashMap<i64, ConflictDetail>,
}

impl ConflictWorkspace {
    pub fn new(api: Arc<dyn AlignerApi>, guid: impl Into<String>) -> Self {
        Self {
            api,
            guid: guid.into(),
            edges: EdgeHandling::None,
            conflicts: None,
            details: HashMap::new(),
        }
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn edges(&self) -> EdgeHandling {
        self.edges
    }

    /// Change which batch edges are considered. Drops the cached list.
    pub fn set_edges(&mut self, edges: EdgeHandling) {
        if self.edges != edges {
            self.edges = edges;
            self.invalidate();
        }
    }

    /// Last fetched list, if still valid.
    pub fn conflicts(&self) -> Option<&[Conflict]> {
        self.conflicts.as_deref()
    }

    pub fn invalidate(&mut self) {
        self.conflicts = None;
        self.details.clear();
    }

    /// Fetch the full unresolved set.
    pub async fn refresh(&mut self) -> Result<&[Conflict]> {
        let list = self.api.conflicts(&self.guid, self.edges).await?;
        debug!(guid = %self.guid, count = list.len(), "conflicts fetched");
        self.details.clear();
        Ok(self.conflicts.insert(list).as_slice())
    }

    /// Detail for one conflict, fetched on first request.
    pub async fn detail(&mut self, id: i64) -> Result<&ConflictDetail> {
        if !self.details.contains_key(&id) {
            let detail = match self.api.conflict_detail(&self.guid, id, self.edges).await {
                Ok(d) => d,
                Err(e) => {
                    if e.is_stale() {
                        self.invalidate();
                    }
                    return Err(e);
                }
            };
            self.details.insert(id, detail);
        }
        self.details
            .get(&id)
            .ok_or_else(|| AlignError::InvalidArgument(format!("conflict {id} not loaded")))
    }

    /// Submit a resolution and re-fetch the unresolved set.
    ///
    /// Resolution does not resume alignment; callers extend the job afterwards.
    pub async fn resolve(&mut self, resolution: &Resolution) -> Result<&[Conflict]> {
        match resolution {
            Resolution::Batches { batch_ids, .. } if batch_ids.is_empty() => {
                return Err(AlignError::InvalidArgument(
                    "resolution needs at least one batch id".into(),
                ));
            }
            Resolution::Decisions(decisions) if decisions.is_empty() => {
                return Err(AlignError::InvalidArgument(
                    "resolution needs at least one decision".into(),
                ));
            }
            _ => {}
        }

        if let Err(e) = self.api.resolve(&self.guid, resolution).await {
            if e.is_stale() {
                self.invalidate();
            }
            return Err(e);
        }
        info!(guid = %self.guid, "resolution accepted");
        self.invalidate();
        self.refresh().await
    }
}
