use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::wire::{self, AlignOp, FlatItem, WireCandidate, WireConflict};
use super::{shared, AlignerApi, Generation, ALIGNMENTS, EXPORT, PROCESSING};
use crate::error::{AlignError, Result};
use crate::model::{
    AlignOptions, BookOptions, CandidateLine, CandidateQuery, Conflict, ConflictDetail,
    DocIndexEntry, Direction, Download, EdgeHandling, EditOperation, EditRequest, Job, NewJob,
    PageData, ProcessingExport, ProcessingItem, ProcessingMeta, Resolution, SplitRequest,
};
use crate::transport::{ApiRequest, Transport};

const START_OPTIONS: &[&str] = &[
    "align_all",
    "batch_ids",
    "batch_shift",
    "window",
    "use_proxy_from",
    "use_proxy_to",
];
const EXTEND_OPTIONS: &[&str] = &[
    "amount",
    "batch_shift",
    "window",
    "use_proxy_from",
    "use_proxy_to",
];

/// Adapter for the current server generation (`align/next`, `{items}` envelopes,
/// typed edit operations).
pub struct CurrentApi {
    transport: Arc<dyn Transport>,
}

#[derive(Deserialize)]
struct DetailBody {
    #[serde(flatten)]
    head: WireConflict,
    #[serde(default)]
    from: Vec<String>,
    #[serde(default)]
    to: Vec<String>,
    #[serde(default)]
    items: Vec<Vec<String>>,
}

#[derive(Deserialize)]
struct PageBody {
    #[serde(default)]
    items: Vec<FlatItem>,
    #[serde(default)]
    meta: PageMeta,
}

#[derive(Deserialize, Default)]
struct PageMeta {
    #[serde(default)]
    page: u32,
    #[serde(default)]
    total_pages: u32,
}

#[derive(Deserialize, Default)]
struct MetaBody {
    #[serde(default)]
    total_items: u64,
    #[serde(default)]
    lang_from: String,
    #[serde(default)]
    lang_to: String,
    #[serde(default)]
    batch_ids: Vec<i64>,
}

#[derive(Deserialize)]
struct SplittedLine {
    #[serde(default)]
    e: bool,
}

impl CurrentApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn post_processing(&self, guid: &str, action: &str, body: Value) -> Result<()> {
        self.transport
            .request(ApiRequest::post(format!("{PROCESSING}/{guid}/{action}")).json(body))
            .await?;
        Ok(())
    }

    async fn line_excluded(&self, guid: &str, direction: Direction, line_id: i64) -> Result<bool> {
        let body = self
            .transport
            .request(
                ApiRequest::get(format!("{PROCESSING}/{guid}/splitted/{direction}"))
                    .query("ids", format!("[{line_id}]")),
            )
            .await?
            .into_value();
        let lines: BTreeMap<String, SplittedLine> = match body.get("items") {
            Some(items) if items.is_object() => serde_json::from_value(items.clone())
                .map_err(|e| AlignError::decode("splitted lines", e))?,
            _ => BTreeMap::new(),
        };
        lines
            .get(&line_id.to_string())
            .map(|line| line.e)
            .ok_or_else(|| AlignError::Api {
                status: 404,
                detail: format!("line {line_id} ({direction}) not found"),
                payload: Value::Null,
            })
    }
}

fn edit_body(req: &EditRequest) -> Value {
    let mut body = json!({
        "index_id": req.index_id,
        "batch_id": req.batch_id,
        "batch_index_id": req.batch_index_id,
        "text_type": req.direction,
        "operation": req.operation.wire_name(),
        "text": "",
        "candidate_line_id": -1,
        "candidate_text": "",
        "line_id_from": -1,
        "line_id_to": -1,
    });
    match &req.operation {
        EditOperation::EditLine { text }
        | EditOperation::AppendToPrevious { text }
        | EditOperation::AppendToNext { text } => {
            body["text"] = json!(text);
        }
        EditOperation::AppendCandidate {
            candidate_line_id,
            candidate_text,
        } => {
            body["candidate_line_id"] = json!(candidate_line_id);
            body["candidate_text"] = json!(candidate_text);
        }
        EditOperation::RelinkLines {
            line_id_from,
            line_id_to,
        } => {
            body["line_id_from"] = json!(line_id_from);
            body["line_id_to"] = json!(line_id_to);
        }
        EditOperation::ClearLine
        | EditOperation::DeleteLine
        | EditOperation::AddEmptyLineBefore
        | EditOperation::AddEmptyLineAfter => {}
    }
    body
}

fn book_body(opts: &BookOptions) -> Value {
    json!({
        "par_direction": opts.par_direction,
        "left_lang": opts.left_lang,
        "style": opts.theme.as_deref().unwrap_or("none"),
    })
}

#[async_trait]
impl AlignerApi for CurrentApi {
    fn generation(&self) -> Generation {
        Generation::Current
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
            .request(ApiRequest::post(format!("{ALIGNMENTS}/{guid}/align/next")).json(body))
            .await?;
        Ok(())
    }

    async fn stop(&self, guid: &str) -> Result<()> {
        self.transport
            .request(ApiRequest::post(format!("{ALIGNMENTS}/{guid}/align/stop")))
            .await?;
        Ok(())
    }

    async fn conflicts(&self, guid: &str, edges: EdgeHandling) -> Result<Vec<Conflict>> {
        let body = self
            .transport
            .request(
                ApiRequest::get(format!("{ALIGNMENTS}/{guid}/conflicts"))
                    .query("handle_edges", edges.as_str()),
            )
            .await?
            .into_value();
        wire::list_field::<Conflict, WireConflict>(body, "items", "conflict list")
    }

    async fn conflict_detail(
        &self,
        guid: &str,
        id: i64,
        edges: EdgeHandling,
    ) -> Result<ConflictDetail> {
        let body: DetailBody = self
            .transport
            .request(
                ApiRequest::get(format!("{ALIGNMENTS}/{guid}/conflicts/{id}"))
                    .query("handle_edges", edges.as_str()),
            )
            .await?
            .decode("conflict detail")?;
        Ok(body.head.into_detail(body.from, body.to, body.items))
    }

    async fn resolve(&self, guid: &str, resolution: &Resolution) -> Result<()> {
        let body = match resolution {
            Resolution::Decisions(decisions) => json!({ "decisions": decisions }),
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
                ApiRequest::get(format!("{PROCESSING}/{guid}/page"))
                    .query("count", count)
                    .query("page", page),
            )
            .await?
            .decode("processing page")?;
        Ok(PageData {
            items: body.items.into_iter().map(Into::into).collect(),
            page: if body.meta.page == 0 { page } else { body.meta.page },
            total_pages: body.meta.total_pages,
        })
    }

    async fn meta(&self, guid: &str) -> Result<ProcessingMeta> {
        #[derive(Deserialize)]
        struct Envelope {
            #[serde(default)]
            meta: MetaBody,
        }
        let body: Envelope = self
            .transport
            .request(ApiRequest::get(format!("{PROCESSING}/{guid}/meta")))
            .await?
            .decode("processing meta")?;
        Ok(ProcessingMeta {
            total_items: body.meta.total_items,
            lang_from: body.meta.lang_from,
            lang_to: body.meta.lang_to,
            batch_ids: body.meta.batch_ids,
        })
    }

    async fn doc_index(&self, guid: &str) -> Result<Vec<DocIndexEntry>> {
        let body = self
            .transport
            .request(ApiRequest::get(format!("{PROCESSING}/{guid}/index")))
            .await?
            .into_value();
        wire::list_field::<DocIndexEntry, DocIndexEntry>(body, "items", "document index")
    }

    async fn edit(&self, guid: &str, req: &EditRequest) -> Result<()> {
        self.post_processing(guid, "edit", edit_body(req)).await
    }

    async fn split(&self, guid: &str, req: &SplitRequest) -> Result<()> {
        let body = json!({
            "direction": req.direction,
            "line_id": req.line_id,
            "part1": req.part1,
            "part2": req.part2,
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
        wire::list_field::<CandidateLine, WireCandidate>(body, "items", "candidate lines")
    }

    async fn set_excluded(
        &self,
        guid: &str,
        direction: Direction,
        line_id: i64,
        excluded: bool,
    ) -> Result<()> {
        // The server only offers a switch, so read the flag first.
        if self.line_excluded(guid, direction, line_id).await? == excluded {
            debug!(guid, line_id, %direction, excluded, "exclude flag already set");
            return Ok(());
        }
        self.transport
            .request(
                ApiRequest::post(format!("{PROCESSING}/{guid}/exclude"))
                    .query("line_id", line_id)
                    .query("text_type", direction),
            )
            .await?;
        Ok(())
    }

    async fn line_position(&self, guid: &str, lang: &str, line_id: i64) -> Result<Option<u64>> {
        #[derive(Deserialize)]
        struct Position {
            pos: i64,
        }
        let body: Position = self
            .transport
            .request(ApiRequest::get(format!(
                "{PROCESSING}/{guid}/find/{lang}/{line_id}"
            )))
            .await?
            .decode("line position")?;
        // -1 means not found
        Ok(u64::try_from(body.pos).ok())
    }

    async fn items_by_ids(&self, guid: &str, index_ids: &[i64]) -> Result<Vec<ProcessingItem>> {
        let body = self
            .transport
            .request(
                ApiRequest::post(format!("{PROCESSING}/{guid}/page/by-ids")).json(json!(index_ids)),
            )
            .await?
            .into_value();
        let keyed: BTreeMap<String, Value> = match body.get("items") {
            Some(items) if items.is_object() => serde_json::from_value(items.clone())
                .map_err(|e| AlignError::decode("items by id", e))?,
            _ => BTreeMap::new(),
        };
        let mut items = Vec::with_capacity(keyed.len());
        for (key, mut raw) in keyed {
            let Ok(index_id) = key.parse::<i64>() else {
                debug!(guid, key, "skipping item with a non-numeric key");
                continue;
            };
            if let Some(fields) = raw.as_object_mut() {
                fields.entry("index_id").or_insert(json!(index_id));
            }
            let item: FlatItem =
                serde_json::from_value(raw).map_err(|e| AlignError::decode("items by id", e))?;
            items.push(ProcessingItem::from(item));
        }
        items.sort_by_key(|item| item.index_id);
        Ok(items)
    }

    async fn export_processing(&self, guid: &str, opts: &ProcessingExport) -> Result<Download> {
        let body = json!({
            "format": opts.format,
            "side": opts.side,
            "paragraphs": opts.paragraphs,
            "direction": opts.direction,
            "left_lang": opts.left_lang,
        });
        self.transport
            .download(
                ApiRequest::post(format!("{EXPORT}/{guid}/download/{}", opts.format)).json(body),
            )
            .await
    }

    async fn book_preview(&self, guid: &str, opts: &BookOptions) -> Result<String> {
        #[derive(Deserialize)]
        struct Preview {
            items: String,
        }
        let preview: Preview = self
            .transport
            .request(
                ApiRequest::post(format!("{EXPORT}/{guid}/book/preview")).json(book_body(opts)),
            )
            .await?
            .decode("book preview")?;
        Ok(preview.items)
    }

    async fn download_book(&self, guid: &str, opts: &BookOptions) -> Result<Download> {
        self.transport
            .download(
                ApiRequest::post(format!("{EXPORT}/{guid}/book/download")).json(book_body(opts)),
            )
            .await
    }
}
