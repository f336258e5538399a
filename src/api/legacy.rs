use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use super::wire::{self, AlignOp, NestedItem, WireCandidate, WireConflict};
use super::{shared, AlignerApi, Generation, ALIGNMENTS, EXPORT, PROCESSING};
use crate::error::{AlignError, Result};
use crate::model::{
    AlignOptions, BookOptions, CandidateLine, CandidateQuery, Conflict, ConflictDetail,
    DocIndexEntry, Direction, Download, EdgeHandling, EditOperation, EditRequest, Job, NewJob,
    PageData, ProcessingExport, ProcessingItem, ProcessingMeta, Resolution, SplitRequest,
};
use crate::transport::{ApiRequest, Transport};

const START_OPTIONS: &[&str] = &[
    "batch_ids",
    "batch_shift",
    "window",
    "use_proxy_from",
    "use_proxy_to",
    "batch_size",
    "batch_count",
];
const EXTEND_OPTIONS: &[&str] = &[
    "amount",
    "batch_shift",
    "window",
    "use_proxy_from",
    "use_proxy_to",
    "batch_size",
    "batch_count",
];

/// Adapter for the older server generation: dashed action paths, named list
/// envelopes and plain-text edits only.
pub struct LegacyApi {
    transport: Arc<dyn Transport>,
}

#[derive(Deserialize)]
struct DetailBody {
    #[serde(flatten)]
    head: WireConflict,
    #[serde(default)]
    left: Vec<String>,
    #[serde(default)]
    right: Vec<String>,
    #[serde(default)]
    candidates: Vec<Vec<String>>,
}

#[derive(Deserialize)]
struct PageBody {
    #[serde(default)]
    items: Vec<NestedItem>,
    /// Total item count, not pages.
    #[serde(default)]
    total: u64,
    #[serde(default)]
    page: u32,
    #[serde(default)]
    count: u32,
}

#[derive(Deserialize)]
struct MetaBody {
    #[serde(default)]
    total_items: u64,
    #[serde(default)]
    lang_from: String,
    #[serde(default)]
    lang_to: String,
}

impl LegacyApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn post_processing(
        &self,
        guid: &str,
        action: &str,
        body: serde_json::Value,
    ) -> Result<()> {
        self.transport
            .request(ApiRequest::post(format!("{PROCESSING}/{guid}/{action}")).json(body))
            .await?;
        Ok(())
    }
}

fn total_pages(total_items: u64, count: u32) -> u32 {
    if count == 0 {
        return 0;
    }
    total_items.div_ceil(count as u64).min(u32::MAX as u64) as u32
}

fn book_request(path: String, opts: &BookOptions) -> ApiRequest {
    let req = ApiRequest::get(path).query("format", &opts.format);
    match opts.theme.as_deref() {
        Some(theme) if !theme.is_empty() => req.query("theme", theme),
        _ => req,
    }
}

#[async_trait]
impl AlignerApi for LegacyApi {
    fn generation(&self) -> Generation {
        Generation::Legacy
    }

    fn accepted_options(&self, op: AlignOp) -> &'static [&'static str] {
        match op {
            AlignOp::Start => START_OPTIONS,
            AlignOp::Extend => EXTEND_OPTIONS,
        }
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        shared::list_jobs(self.transport.as_ref()).await
    }

    async fn create_job(&self, new: &NewJob) -> Result<Job> {
        shared::create_job(self.transport.as_ref(), new).await
    }

    async fn delete_job(&self, guid: &str) -> Result<()> {
        shared::delete_job(self.transport.as_ref(), guid).await
    }

    async fn progress(&self, guid: &str) -> Result<Job> {
        shared::progress(self.transport.as_ref(), guid).await
    }

    async fn upload_proxy(
        &self,
        guid: &str,
        direction: Direction,
        file_name: &str,
        bytes: Bytes,
    ) -> Result<()> {
        shared::upload_proxy(self.transport.as_ref(), guid, direction, file_name, bytes).await
    }

    async fn start(&self, guid: &str, opts: &AlignOptions) -> Result<()> {
        let (body, _) = wire::option_body(AlignOp::Start, opts, START_OPTIONS)?;
        shared::start(self.transport.as_ref(), guid, body).await
    }

    async fn extend(&self, guid: &str, opts: &AlignOptions) -> Result<()> {
        let (body, _) = wire::option_body(AlignOp::Extend, opts, EXTEND_OPTIONS)?;
        self.transport
            .request(ApiRequest::post(format!("{ALIGNMENTS}/{guid}/align-next")).json(body))
            .await?;
        Ok(())
    }

    async fn stop(&self, guid: &str) -> Result<()> {
        self.transport
            .request(ApiRequest::post(format!("{ALIGNMENTS}/{guid}/stop")))
            .await?;
        Ok(())
    }

    async fn conflicts(&self, guid: &str, edges: EdgeHandling) -> Result<Vec<Conflict>> {
        if edges != EdgeHandling::None {
            debug!(guid, edges = edges.as_str(), "edge handling is not sent to legacy servers");
        }
        let body = self
            .transport
            .request(ApiRequest::get(format!("{ALIGNMENTS}/{guid}/conflicts")))
            .await?
            .into_value();
        wire::list_field::<Conflict, WireConflict>(body, "conflicts", "conflict list")
    }

    async fn conflict_detail(
        &self,
        guid: &str,
        id: i64,
        edges: EdgeHandling,
    ) -> Result<ConflictDetail> {
        if edges != EdgeHandling::None {
            debug!(guid, edges = edges.as_str(), "edge handling is not sent to legacy servers");
        }
        let body: DetailBody = self
            .transport
            .request(ApiRequest::get(format!("{ALIGNMENTS}/{guid}/conflicts/{id}")))
            .await?
            .decode("conflict detail")?;
        Ok(body.head.into_detail(body.left, body.right, body.candidates))
    }

    async fn resolve(&self, guid: &str, resolution: &Resolution) -> Result<()> {
        let body = match resolution {
            Resolution::Decisions(decisions) => json!({ "resolutions": decisions }),
            batches => shared::resolve_batches_body(batches).unwrap_or_default(),
        };
        self.transport
            .request(ApiRequest::post(format!("{ALIGNMENTS}/{guid}/resolve")).json(body))
            .await?;
        Ok(())
    }

    async fn page(&self, guid: &str, count: u32, page: u32) -> Result<PageData> {
        let body: PageBody = self
            .transport
            .request(
                ApiRequest::get(format!("{PROCESSING}/{guid}"))
                    .query("count", count)
                    .query("page", page),
            )
            .await?
            .decode("processing page")?;
        let per_page = if body.count == 0 { count } else { body.count };
        Ok(PageData {
            items: body.items.into_iter().map(Into::into).collect(),
            page: if body.page == 0 { page } else { body.page },
            total_pages: total_pages(body.total, per_page),
        })
    }

    async fn meta(&self, guid: &str) -> Result<ProcessingMeta> {
        let body: MetaBody = self
            .transport
            .request(ApiRequest::get(format!("{PROCESSING}/{guid}/meta")))
            .await?
            .decode("processing meta")?;
        Ok(ProcessingMeta {
            total_items: body.total_items,
            lang_from: body.lang_from,
            lang_to: body.lang_to,
            batch_ids: Vec::new(),
        })
    }

    async fn doc_index(&self, guid: &str) -> Result<Vec<DocIndexEntry>> {
        let body = self
            .transport
            .request(ApiRequest::get(format!("{PROCESSING}/{guid}/index")))
            .await?
            .into_value();
        wire::list_field::<DocIndexEntry, DocIndexEntry>(body, "index", "document index")
    }

    async fn edit(&self, guid: &str, req: &EditRequest) -> Result<()> {
        let EditOperation::EditLine { text } = &req.operation else {
            return Err(AlignError::Unsupported {
                operation: req.operation.wire_name(),
                generation: Generation::Legacy,
            });
        };
        let body = json!({
            "index_id": req.index_id,
            "text": text,
            "text_type": req.direction,
        });
        self.post_processing(guid, "edit", body).await
    }

    async fn split(&self, guid: &str, req: &SplitRequest) -> Result<()> {
        let body = json!({
            "index_id": req.line_id,
            "text_type": req.direction,
            "position": req.part1.chars().count(),
        });
        self.post_processing(guid, "split", body).await
    }

    async fn candidates(&self, guid: &str, query: &CandidateQuery) -> Result<Vec<CandidateLine>> {
        let body = self
            .transport
            .request(
                ApiRequest::get(format!("{PROCESSING}/{guid}/candidates"))
                    .query("text_type", query.direction)
                    .query("index_id", query.index_id)
                    .query("count_before", query.count_before)
                    .query("count_after", query.count_after)
                    .query("shift", query.shift),
            )
            .await?
            .into_value();
        wire::list_field::<CandidateLine, WireCandidate>(body, "candidates", "candidate lines")
    }

    async fn set_excluded(
        &self,
        guid: &str,
        direction: Direction,
        line_id: i64,
        excluded: bool,
    ) -> Result<()> {
        let body = json!({
            "index_id": line_id,
            "text_type": direction,
            "excluded": excluded,
        });
        self.post_processing(guid, "toggle-excluded", body).await
    }

    async fn line_position(&self, _guid: &str, _lang: &str, _line_id: i64) -> Result<Option<u64>> {
        Err(AlignError::Unsupported {
            operation: "line position",
            generation: Generation::Legacy,
        })
    }

    async fn items_by_ids(&self, _guid: &str, _index_ids: &[i64]) -> Result<Vec<ProcessingItem>> {
        Err(AlignError::Unsupported {
            operation: "items by id",
            generation: Generation::Legacy,
        })
    }

    async fn export_processing(&self, guid: &str, opts: &ProcessingExport) -> Result<Download> {
        self.transport
            .download(
                ApiRequest::get(format!("{EXPORT}/{guid}/processing"))
                    .query("format", &opts.format),
            )
            .await
    }

    async fn book_preview(&self, guid: &str, opts: &BookOptions) -> Result<String> {
        #[derive(Deserialize)]
        struct Preview {
            html: String,
        }
        let preview: Preview = self
            .transport
            .request(book_request(format!("{EXPORT}/{guid}/book/preview"), opts))
            .await?
            .decode("book preview")?;
        Ok(preview.html)
    }

    async fn download_book(&self, guid: &str, opts: &BookOptions) -> Result<Download> {
        self.transport
            .download(book_request(format!("{EXPORT}/{guid}/book"), opts))
            .await
    }
}
