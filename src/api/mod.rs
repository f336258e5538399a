//! Logical server operations behind one trait, with one adapter per protocol
//! generation. Call sites never branch on the generation.

pub mod current;
pub mod legacy;
mod wire;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{
    AlignOptions, BookOptions, CandidateLine, CandidateQuery, Conflict, ConflictDetail,
    DocIndexEntry, Direction, Download, EdgeHandling, EditRequest, Job, NewJob, PageData,
    ProcessingExport, ProcessingItem, ProcessingMeta, Resolution, SplitRequest,
};
use crate::transport::{ApiRequest, Transport, UploadForm};

pub use current::CurrentApi;
pub use legacy::LegacyApi;
pub use wire::AlignOp;

pub(crate) const ALIGNMENTS: &str = "/api/aligner/alignments";
pub(crate) const PROCESSING: &str = "/api/aligner/processing";
pub(crate) const EXPORT: &str = "/api/aligner/export";

/// Wire-protocol generation spoken by the server.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Generation {
    #[default]
    Current,
    Legacy,
}

impl Generation {
    pub fn as_str(self) -> &'static str {
        match self {
            Generation::Current => "current",
            Generation::Legacy => "legacy",
        }
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[async_trait]
pub trait AlignerApi: Send + Sync {
    fn generation(&self) -> Generation;

    /// Option names the server accepts for `op`. Anything else is dropped.
    fn accepted_options(&self, op: AlignOp) -> &'static [&'static str];

    async fn list_jobs(&self) -> Result<Vec<Job>>;
    async fn create_job(&self, new: &NewJob) -> Result<Job>;
    async fn delete_job(&self, guid: &str) -> Result<()>;
    /// Authoritative snapshot.
    async fn progress(&self, guid: &str) -> Result<Job>;
    async fn upload_proxy(
        &self,
        guid: &str,
        direction: Direction,
        file_name: &str,
        bytes: Bytes,
    ) -> Result<()>;

    async fn start(&self, guid: &str, opts: &AlignOptions) -> Result<()>;
    async fn extend(&self, guid: &str, opts: &AlignOptions) -> Result<()>;
    async fn stop(&self, guid: &str) -> Result<()>;

    async fn conflicts(&self, guid: &str, edges: EdgeHandling) -> Result<Vec<Conflict>>;
    /// Detail for conflict `id` of the list built with the same `edges`.
    async fn conflict_detail(
        &self,
        guid: &str,
        id: i64,
        edges: EdgeHandling,
    ) -> Result<ConflictDetail>;
    async fn resolve(&self, guid: &str, resolution: &Resolution) -> Result<()>;

    async fn page(&self, guid: &str, count: u32, page: u32) -> Result<PageData>;
    async fn meta(&self, guid: &str) -> Result<ProcessingMeta>;
    async fn doc_index(&self, guid: &str) -> Result<Vec<DocIndexEntry>>;
    async fn edit(&self, guid: &str, req: &EditRequest) -> Result<()>;
    async fn split(&self, guid: &str, req: &SplitRequest) -> Result<()>;
    async fn candidates(&self, guid: &str, query: &CandidateQuery) -> Result<Vec<CandidateLine>>;
    /// Position of physical line `line_id` in the flattened index, `None` if no
    /// entry carries it. `lang` is the job's language code for the line's side.
    async fn line_position(&self, guid: &str, lang: &str, line_id: i64) -> Result<Option<u64>>;
    /// Items at the given index ids, in index order. Ids past the end are skipped.
    async fn items_by_ids(&self, guid: &str, index_ids: &[i64]) -> Result<Vec<ProcessingItem>>;
    /// Set the excluded flag of one physical line. Setting the current value is a no-op.
    async fn set_excluded(
        &self,
        guid: &str,
        direction: Direction,
        line_id: i64,
        excluded: bool,
    ) -> Result<()>;

    async fn export_processing(&self, guid: &str, opts: &ProcessingExport) -> Result<Download>;
    async fn book_preview(&self, guid: &str, opts: &BookOptions) -> Result<String>;
    async fn download_book(&self, guid: &str, opts: &BookOptions) -> Result<Download>;
}

/// Build the adapter for `generation` over a shared transport.
pub fn connect(generation: Generation, transport: Arc<dyn Transport>) -> Arc<dyn AlignerApi> {
    match generation {
        Generation::Current => Arc::new(CurrentApi::new(transport)),
        Generation::Legacy => Arc::new(LegacyApi::new(transport)),
    }
}

/// Endpoints with the same shape in both generations.
pub(crate) mod shared {
    use super::*;

    pub async fn list_jobs(t: &dyn Transport) -> Result<Vec<Job>> {
        t.request(ApiRequest::get(format!("{ALIGNMENTS}/")))
            .await?
            .decode("job list")
    }

    pub async fn create_job(t: &dyn Transport, new: &NewJob) -> Result<Job> {
        let body = json!({
            "name": new.name,
            "document_from_guid": new.document_from_guid,
            "document_to_guid": new.document_to_guid,
        });
        t.request(ApiRequest::post(format!("{ALIGNMENTS}/")).json(body))
            .await?
            .decode("created job")
    }

    pub async fn delete_job(t: &dyn Transport, guid: &str) -> Result<()> {
        t.request(ApiRequest::delete(format!("{ALIGNMENTS}/{guid}")))
            .await?;
        Ok(())
    }

    pub async fn progress(t: &dyn Transport, guid: &str) -> Result<Job> {
        t.request(ApiRequest::get(format!("{ALIGNMENTS}/{guid}/progress")))
            .await?
            .decode("job progress")
    }

    pub async fn start(t: &dyn Transport, guid: &str, body: serde_json::Value) -> Result<()> {
        t.request(ApiRequest::post(format!("{ALIGNMENTS}/{guid}/align")).json(body))
            .await?;
        Ok(())
    }

    pub async fn upload_proxy(
        t: &dyn Transport,
        guid: &str,
        direction: Direction,
        file_name: &str,
        bytes: Bytes,
    ) -> Result<()> {
        let form = UploadForm::new().file("file", file_name, bytes);
        t.upload(&format!("{ALIGNMENTS}/{guid}/proxy/{direction}"), form)
            .await?;
        Ok(())
    }

    pub fn resolve_batches_body(resolution: &Resolution) -> Option<serde_json::Value> {
        match resolution {
            Resolution::Batches {
                batch_ids,
                use_proxy_from,
                use_proxy_to,
                handle_start,
                handle_finish,
            } => Some(json!({
                "batch_ids": batch_ids,
                "use_proxy_from": use_proxy_from,
                "use_proxy_to": use_proxy_to,
                "handle_start": handle_start,
                "handle_finish": handle_finish,
            })),
            Resolution::Decisions(_) => None,
        }
    }
}
