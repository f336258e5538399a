//! Paginated editing workspace over a job's aligned line pairs.
//!
//! Pages, the document index, meta and the candidate window are cached per
//! fetch. Any mutation invalidates the caches it can affect; nothing is patched
//! locally because the server renumbers items on structural changes.

use std::sync::Arc;
use tracing::debug;

use crate::api::AlignerApi;
use crate::error::{AlignError, Result};
use crate::model::{
    CandidateLine, CandidateQuery, DocIndexEntry, Direction, EditRequest, ProcessingItem,
    ProcessingMeta, SplitRequest,
};

pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// One fetched page after clamping.
#[derive(Debug, Clone, PartialEq)]
pub struct PageView {
    pub items: Vec<ProcessingItem>,
    /// 1-indexed, always within `1..=total_pages`.
    pub page: u32,
    /// At least 1; a job without items has one empty page.
    pub total_pages: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone)]
pub struct CandidateWindow {
    pub query: CandidateQuery,
    pub lines: Vec<CandidateLine>,
}

/// Page count for `total_items` at `page_size` items per page.
pub fn page_count(total_items: u64, page_size: u32) -> u32 {
    if page_size == 0 {
        return 1;
    }
    total_items
        .div_ceil(page_size as u64)
        .clamp(1, u32::MAX as u64) as u32
}

/// 1-indexed page holding the item at 0-based `position`.
pub fn page_of(position: u64, page_size: u32) -> u32 {
    let size = page_size.max(1) as u64;
    (position / size + 1).min(u32::MAX as u64) as u32
}

pub struct ProcessingWorkspace {
    api: Arc<dyn AlignerApi>,
    guid: String,
    page_size: u32,
    requested_page: u32,
    page: Option<PageView>,
    meta: Option<ProcessingMeta>,
    index: Option<Vec<DocIndexEntry>>,
    candidates: Option<CandidateWindow>,
}

impl ProcessingWorkspace {
    pub fn new(api: Arc<dyn AlignerApi>, guid: impl Into<String>) -> Self {
        Self {
            api,
            guid: guid.into(),
            page_size: DEFAULT_PAGE_SIZE,
            requested_page: 1,
            page: None,
            meta: None,
            index: None,
            candidates: None,
        }
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// Current page, if no mutation has invalidated it since the fetch.
    pub fn page(&self) -> Option<&PageView> {
        self.page.as_ref()
    }

    pub fn cached_meta(&self) -> Option<&ProcessingMeta> {
        self.meta.as_ref()
    }

    pub fn cached_index(&self) -> Option<&[DocIndexEntry]> {
        self.index.as_deref()
    }

    pub fn candidate_window(&self) -> Option<&CandidateWindow> {
        self.candidates.as_ref()
    }

    /// Fetch page `page` (1-indexed) of `page_size` items.
    ///
    /// Page 0 is treated as page 1. A page past the end yields no items and
    /// reports the last page instead of failing.
    pub async fn fetch_page(&mut self, page_size: u32, page: u32) -> Result<&PageView> {
        if page_size == 0 {
            return Err(AlignError::InvalidArgument("page size must be positive".into()));
        }
        let requested = page.max(1);
        let data = self.api.page(&self.guid, page_size, requested).await?;

        let total_pages = data.total_pages.max(1);
        let view = if requested > data.total_pages {
            debug!(guid = %self.guid, requested, total_pages, "page out of range");
            PageView {
                items: Vec::new(),
                page: total_pages,
                total_pages,
                page_size,
            }
        } else {
            PageView {
                items: data.items,
                page: requested,
                total_pages,
                page_size,
            }
        };
        self.page_size = page_size;
        self.requested_page = requested;
        Ok(self.page.insert(view))
    }

    /// Re-fetch the most recently requested page.
    pub async fn reload(&mut self) -> Result<&PageView> {
        let (size, page) = (self.page_size, self.requested_page);
        self.fetch_page(size, page).await
    }

    pub async fn fetch_meta(&mut self) -> Result<&ProcessingMeta> {
        let meta = self.api.meta(&self.guid).await?;
        Ok(self.meta.insert(meta))
    }

    pub async fn fetch_doc_index(&mut self) -> Result<&[DocIndexEntry]> {
        let index = self.api.doc_index(&self.guid).await?;
        debug!(guid = %self.guid, entries = index.len(), "document index fetched");
        Ok(self.index.insert(index).as_slice())
    }

    /// Page, at the current page size, that shows physical line `line_id`.
    ///
    /// Returns `None` when no index entry carries the line. Meta is fetched
    /// first if it is not cached, since the server addresses sides by language.
    pub async fn locate_line(&mut self, direction: Direction, line_id: i64) -> Result<Option<u32>> {
        if self.meta.is_none() {
            self.fetch_meta().await?;
        }
        let lang = match (self.cached_meta(), direction) {
            (Some(meta), Direction::From) => meta.lang_from.clone(),
            (Some(meta), Direction::To) => meta.lang_to.clone(),
            (None, _) => String::new(),
        };
        if lang.is_empty() {
            return Err(AlignError::InvalidArgument(format!(
                "job {} reports no language for the {direction} side",
                self.guid
            )));
        }
        let Some(position) = self.api.line_position(&self.guid, &lang, line_id).await? else {
            debug!(guid = %self.guid, line_id, %direction, "line not in the index");
            return Ok(None);
        };
        Ok(Some(page_of(position, self.page_size)))
    }

    /// Items at specific index ids, outside the page cache.
    pub async fn fetch_items(&self, index_ids: &[i64]) -> Result<Vec<ProcessingItem>> {
        if index_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.api.items_by_ids(&self.guid, index_ids).await
    }

    /// Physical lines behind `index_id` in `direction`, from the cached index.
    pub fn lines_for(&self, index_id: i64, direction: Direction) -> Vec<&DocIndexEntry> {
        self.index
            .iter()
            .flatten()
            .filter(|e| e.index_id == index_id && e.direction == direction)
            .collect()
    }

    /// Apply an edit. The cached page is dropped; structural operations also
    /// drop the index, meta and candidate window.
    pub async fn edit(&mut self, req: &EditRequest) -> Result<()> {
        let structural = req.operation.is_structural();
        self.mutate(structural, |api, guid| {
            let req = req.clone();
            async move { api.edit(&guid, &req).await }
        })
        .await
    }

    /// Split one physical line into two. Always structural.
    pub async fn split(&mut self, req: &SplitRequest) -> Result<()> {
        if req.part1.is_empty() || req.part2.is_empty() {
            return Err(AlignError::InvalidArgument(
                "both parts of a split must be non-empty".into(),
            ));
        }
        self.mutate(true, |api, guid| {
            let req = req.clone();
            async move { api.split(&guid, &req).await }
        })
        .await
    }

    /// Set the excluded flag of one physical line. Setting the current value
    /// again leaves the server unchanged.
    pub async fn set_excluded(
        &mut self,
        direction: Direction,
        line_id: i64,
        excluded: bool,
    ) -> Result<()> {
        self.mutate(true, |api, guid| async move {
            api.set_excluded(&guid, direction, line_id, excluded).await
        })
        .await
    }

    async fn mutate<F, Fut>(&mut self, structural: bool, call: F) -> Result<()>
    where
        F: FnOnce(Arc<dyn AlignerApi>, String) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        match call(self.api.clone(), self.guid.clone()).await {
            Ok(()) => {
                self.invalidate(structural);
                Ok(())
            }
            Err(e) => {
                // The server no longer matches our view; force a re-fetch.
                if e.is_stale() {
                    self.invalidate(true);
                }
                Err(e)
            }
        }
    }

    /// Drop cached state. `structural` also drops index, meta and candidates.
    pub fn invalidate(&mut self, structural: bool) {
        self.page = None;
        if structural {
            self.index = None;
            self.meta = None;
            self.candidates = None;
        }
    }

    /// Window of physical lines around `query.index_id`.
    pub async fn candidates(&mut self, query: CandidateQuery) -> Result<&[CandidateLine]> {
        let lines = self.api.candidates(&self.guid, &query).await?;
        let window = self.candidates.insert(CandidateWindow { query, lines });
        Ok(window.lines.as_slice())
    }

    /// Move the last candidate window by `delta` lines.
    pub async fn scroll_candidates(&mut self, delta: i64) -> Result<&[CandidateLine]> {
        let query = self
            .candidates
            .as_ref()
            .map(|w| w.query.shifted(delta))
            .ok_or_else(|| AlignError::InvalidArgument("no candidate window to scroll".into()))?;
        self.candidates(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{connect, Generation};
    use crate::model::EditOperation;
    use crate::transport::testing::CannedTransport;
    use serde_json::json;

    fn workspace() -> (Arc<CannedTransport>, ProcessingWorkspace) {
        let t = CannedTransport::new();
        let ws = ProcessingWorkspace::new(connect(Generation::Current, t.clone()), "g1");
        (t, ws)
    }

    fn page_body(index_ids: &[i64], page: u32, total_pages: u32) -> serde_json::Value {
        let items: Vec<_> = index_ids
            .iter()
            .map(|id| json!({"index_id": id, "text_from": "a", "text_to": "b",
                             "line_id_from": format!("[{id}]"), "line_id_to": "[]"}))
            .collect();
        json!({"items": items, "meta": {"page": page, "total_pages": total_pages}})
    }

    #[test]
    fn page_count_rounds_up_and_never_hits_zero() {
        assert_eq!(page_count(0, 50), 1);
        assert_eq!(page_count(50, 50), 1);
        assert_eq!(page_count(51, 50), 2);
        assert_eq!(page_count(10, 0), 1);
    }

    #[test]
    fn page_of_is_one_indexed() {
        assert_eq!(page_of(0, 50), 1);
        assert_eq!(page_of(49, 50), 1);
        assert_eq!(page_of(50, 50), 2);
        assert_eq!(page_of(7, 0), 8);
    }

    #[tokio::test]
    async fn locate_line_uses_meta_language_and_page_size() {
        let (t, mut ws) = workspace();
        t.push_json(page_body(&[0, 1], 1, 10));
        ws.fetch_page(20, 1).await.unwrap();
        t.push_json(json!({"meta": {"total_items": 200, "lang_from": "en", "lang_to": "de"}}));
        t.push_json(json!({"pos": 45}));
        assert_eq!(ws.locate_line(Direction::To, 46).await.unwrap(), Some(3));
        assert_eq!(ws.cached_meta().unwrap().lang_to, "de");

        t.push_json(json!({"pos": -1}));
        assert_eq!(ws.locate_line(Direction::From, 999).await.unwrap(), None);

        let reqs = t.requests();
        assert_eq!(reqs.len(), 4);
        assert_eq!(reqs[2].path, "/api/aligner/processing/g1/find/de/46");
        assert_eq!(reqs[3].path, "/api/aligner/processing/g1/find/en/999");
    }

    #[tokio::test]
    async fn locate_line_is_unsupported_on_legacy_servers() {
        let t = CannedTransport::new();
        let mut ws = ProcessingWorkspace::new(connect(Generation::Legacy, t.clone()), "g1");
        t.push_json(json!({"total_items": 3, "lang_from": "en", "lang_to": "de"}));
        let err = ws.locate_line(Direction::From, 1).await.unwrap_err();
        assert!(matches!(err, AlignError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn fetching_no_items_sends_nothing() {
        let (t, ws) = workspace();
        assert!(ws.fetch_items(&[]).await.unwrap().is_empty());
        assert!(t.requests().is_empty());
    }

    #[tokio::test]
    async fn page_zero_means_first_page() {
        let (t, mut ws) = workspace();
        t.push_json(page_body(&[0, 1], 1, 3));
        let view = ws.fetch_page(2, 0).await.unwrap();
        assert_eq!(view.page, 1);
        assert_eq!(t.requests()[0].param("page"), Some("1"));
    }

    #[tokio::test]
    async fn out_of_range_page_is_empty_and_clamped() {
        let (t, mut ws) = workspace();
        t.push_json(page_body(&[], 9, 3));
        let view = ws.fetch_page(50, 9).await.unwrap();
        assert!(view.items.is_empty());
        assert_eq!(view.page, 3);
        assert_eq!(view.total_pages, 3);
    }

    #[tokio::test]
    async fn plain_edit_keeps_index_structural_edit_drops_it() {
        let (t, mut ws) = workspace();
        t.push_json(page_body(&[0], 1, 1));
        t.push_json(json!({"items": [{"id": 1, "index_id": 0, "text_type": "from", "text": "a"}]}));
        ws.fetch_page(50, 1).await.unwrap();
        ws.fetch_doc_index().await.unwrap();

        let mut req = EditRequest {
            index_id: 0,
            batch_id: 0,
            batch_index_id: 0,
            direction: Direction::From,
            operation: EditOperation::EditLine { text: "x".into() },
        };
        ws.edit(&req).await.unwrap();
        assert!(ws.page().is_none());
        assert!(ws.cached_index().is_some());
        assert_eq!(ws.lines_for(0, Direction::From).len(), 1);

        req.operation = EditOperation::AddEmptyLineAfter;
        ws.edit(&req).await.unwrap();
        assert!(ws.cached_index().is_none());
    }

    #[tokio::test]
    async fn failed_edit_keeps_confirmed_page() {
        let (t, mut ws) = workspace();
        t.push_json(page_body(&[0], 1, 1));
        ws.fetch_page(50, 1).await.unwrap();
        t.push_error(500, "boom");
        let req = EditRequest {
            index_id: 0,
            batch_id: 0,
            batch_index_id: 0,
            direction: Direction::To,
            operation: EditOperation::ClearLine,
        };
        assert!(ws.edit(&req).await.is_err());
        assert!(ws.page().is_some());
    }

    #[tokio::test]
    async fn scroll_reuses_last_query() {
        let (t, mut ws) = workspace();
        assert!(ws.scroll_candidates(5).await.is_err());
        ws.candidates(CandidateQuery::new(Direction::To, 12))
            .await
            .unwrap();
        ws.scroll_candidates(5).await.unwrap();
        ws.scroll_candidates(5).await.unwrap();
        let reqs = t.requests();
        assert_eq!(reqs[2].param("shift"), Some("10"));
        assert_eq!(reqs[2].param("index_id"), Some("12"));
    }

    #[tokio::test]
    async fn empty_split_part_is_rejected() {
        let (t, mut ws) = workspace();
        let req = SplitRequest {
            direction: Direction::From,
            line_id: 42,
            part1: "A".into(),
            part2: String::new(),
        };
        assert!(ws.split(&req).await.is_err());
        assert!(t.requests().is_empty());
    }
}
