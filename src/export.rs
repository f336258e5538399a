//! Rendered previews and downloadable artifacts for one job.

use std::sync::Arc;
use tracing::info;

use crate::api::AlignerApi;
use crate::error::{AlignError, Result};
use crate::model::{BookOptions, Download, ProcessingExport};

pub struct Exporter {
    api: Arc<dyn AlignerApi>,
    guid: String,
}

fn check_format(format: &str) -> Result<()> {
    if format.trim().is_empty() {
        return Err(AlignError::InvalidArgument("export format is empty".into()));
    }
    Ok(())
}

impl Exporter {
    pub fn new(api: Arc<dyn AlignerApi>, guid: impl Into<String>) -> Self {
        Self {
            api,
            guid: guid.into(),
        }
    }

    pub async fn processing(&self, opts: &ProcessingExport) -> Result<Download> {
        check_format(&opts.format)?;
        let file = self.api.export_processing(&self.guid, opts).await?;
        info!(
            guid = %self.guid,
            format = %opts.format,
            bytes = file.bytes.len(),
            "processing exported"
        );
        Ok(file)
    }

    /// Book preview as HTML.
    pub async fn preview(&self, opts: &BookOptions) -> Result<String> {
        check_format(&opts.format)?;
        self.api.book_preview(&self.guid, opts).await
    }

    pub async fn book(&self, opts: &BookOptions) -> Result<Download> {
        check_format(&opts.format)?;
        let file = self.api.download_book(&self.guid, opts).await?;
        info!(
            guid = %self.guid,
            format = %opts.format,
            bytes = file.bytes.len(),
            "book downloaded"
        );
        Ok(file)
    }
}
