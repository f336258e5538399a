//! Selected-job facade for UI layers.
//!
//! Conflict and processing state belongs to the selected job only; selecting
//! another job discards it. Polling loops are keyed by guid and are unaffected.

use std::sync::Arc;
use tracing::debug;

use crate::conflicts::ConflictWorkspace;
use crate::error::{AlignError, Result};
use crate::export::Exporter;
use crate::lifecycle::JobController;
use crate::model::Job;
use crate::processing::ProcessingWorkspace;
use crate::registry::JobRegistry;

struct Selection {
    guid: String,
    conflicts: ConflictWorkspace,
    processing: ProcessingWorkspace,
}

pub struct Workbench {
    controller: JobController,
    selected: Option<Selection>,
}

impl Workbench {
    pub fn new(controller: JobController) -> Self {
        Self {
            controller,
            selected: None,
        }
    }

    pub fn controller(&self) -> &JobController {
        &self.controller
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        self.controller.registry()
    }

    /// Select `guid`, loading its snapshot if it is not tracked yet.
    pub async fn select(&mut self, guid: &str) -> Result<Job> {
        let registry = self.controller.registry();
        let job = match registry.get(guid) {
            Some(job) => job,
            None => registry.load(guid).await?,
        };
        if let Some(prev) = self.selected.take() {
            debug!(from = %prev.guid, to = guid, "discarding workspaces of previous job");
        }
        let api = registry.api().clone();
        self.selected = Some(Selection {
            guid: guid.to_string(),
            conflicts: ConflictWorkspace::new(api.clone(), guid),
            processing: ProcessingWorkspace::new(api, guid),
        });
        Ok(job)
    }

    pub fn selected_guid(&self) -> Option<&str> {
        self.selected.as_ref().map(|s| s.guid.as_str())
    }

    fn selection_mut(&mut self) -> Result<&mut Selection> {
        self.selected
            .as_mut()
            .ok_or_else(|| AlignError::InvalidArgument("no job selected".into()))
    }

    pub fn conflicts(&mut self) -> Result<&mut ConflictWorkspace> {
        Ok(&mut self.selection_mut()?.conflicts)
    }

    pub fn processing(&mut self) -> Result<&mut ProcessingWorkspace> {
        Ok(&mut self.selection_mut()?.processing)
    }

    pub fn exporter(&self) -> Result<Exporter> {
        let guid = self
            .selected_guid()
            .ok_or_else(|| AlignError::InvalidArgument("no job selected".into()))?;
        Ok(Exporter::new(self.registry().api().clone(), guid))
    }
}
