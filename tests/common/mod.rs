//! Shared test utilities for align-sync integration tests.
//!
//! `FakeServer` implements `Transport` in memory and speaks the current
//! protocol generation. It counts calls per route, can hold the start request
//! until released, and keeps per-direction document lines so splits and
//! exclusions behave like the real server.

#![allow(dead_code)]

use align_sync::api::{connect, Generation};
use align_sync::error::{AlignError, Result};
use align_sync::lifecycle::JobController;
use align_sync::model::{Download, Job, JobEvent, JobState};
use align_sync::registry::JobRegistry;
use align_sync::transport::{ApiRequest, Method, Reply, Transport, UploadForm};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

const PREFIX: &str = "/api/aligner/";

#[derive(Debug, Clone)]
pub struct Line {
    pub id: i64,
    pub text: String,
    pub exclude: bool,
}

#[derive(Default)]
pub struct State {
    pub jobs: BTreeMap<String, Job>,
    /// Snapshots handed out by successive progress fetches, per guid.
    pub progress_script: HashMap<String, VecDeque<Job>>,
    pub calls: HashMap<String, usize>,
    pub fail_start: Option<(u16, String)>,
    pub fail_progress: bool,
    /// Snapshots scheduled by a successful `align/next`.
    pub next_script: Vec<Job>,
    pub conflicts: Vec<Value>,
    pub conflicts_after_resolve: Option<Vec<Value>>,
    pub from_lines: Vec<Line>,
    pub to_lines: Vec<Line>,
    pub edits: Vec<Value>,
}

impl State {
    fn lines(&mut self, direction: &str) -> &mut Vec<Line> {
        if direction == "from" {
            &mut self.from_lines
        } else {
            &mut self.to_lines
        }
    }

    fn item_count(&self) -> usize {
        self.from_lines.len().max(self.to_lines.len())
    }

    fn item(&self, i: usize) -> Value {
        let side = |lines: &[Line]| {
            lines
                .get(i)
                .map(|l| (l.text.clone(), format!("[{}]", l.id)))
                .unwrap_or_else(|| (String::new(), "[]".to_string()))
        };
        let (text_from, ids_from) = side(&self.from_lines);
        let (text_to, ids_to) = side(&self.to_lines);
        json!({
            "index_id": i,
            "batch_id": i / 10,
            "batch_index_id": i % 10,
            "text_from": text_from,
            "text_to": text_to,
            "line_id_from": ids_from,
            "line_id_to": ids_to,
            "processing_from_id": i + 1,
            "processing_to_id": i + 1,
        })
    }
}

#[derive(Default)]
pub struct FakeServer {
    state: Mutex<State>,
    start_gate: Mutex<Option<Arc<Notify>>>,
}

pub fn job(guid: &str, state: JobState, curr: u32, total: u32) -> Job {
    Job {
        id: 1,
        guid: guid.to_string(),
        name: "t".to_string(),
        lang_from: "en".to_string(),
        lang_to: "de".to_string(),
        state,
        curr_batches: curr,
        total_batches: total,
        is_deleted: false,
        is_uploaded: true,
        proxy_from_loaded: false,
        proxy_to_loaded: false,
        document_from_id: 1,
        document_to_id: 2,
        created_at: "2024-01-01T00:00:00".to_string(),
    }
}

pub fn lines(prefix: &str, count: i64) -> Vec<Line> {
    (1..=count)
        .map(|id| Line {
            id,
            text: format!("{prefix} {id}"),
            exclude: false,
        })
        .collect()
}

fn reject(status: u16, detail: &str) -> AlignError {
    let body = json!({ "detail": detail }).to_string();
    AlignError::from_response(status, "", body.as_bytes())
}

fn ok() -> Result<Reply> {
    Ok(Reply::Json(json!({"status": "ok"})))
}

fn to_value<T: serde::Serialize>(v: &T) -> Value {
    serde_json::to_value(v).unwrap_or(Value::Null)
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn insert_job(&self, job: Job) {
        self.state().jobs.insert(job.guid.clone(), job);
    }

    /// Queue snapshots returned by the next progress fetches.
    pub fn script_progress(&self, guid: &str, snapshots: Vec<Job>) {
        self.state()
            .progress_script
            .entry(guid.to_string())
            .or_default()
            .extend(snapshots);
    }

    /// Hold `POST .../align` until the returned notify is signalled.
    pub fn gate_start(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.start_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Number of calls to `"{METHOD} {path}"` where path omits `/api/aligner/`.
    pub fn calls(&self, route: &str) -> usize {
        self.state().calls.get(route).copied().unwrap_or(0)
    }

    pub fn line(&self, direction: &str, id: i64) -> Option<Line> {
        self.state()
            .lines(direction)
            .iter()
            .find(|l| l.id == id)
            .cloned()
    }

    fn route(&self, state: &mut State, req: &ApiRequest) -> Result<Reply> {
        let path = req.path.trim_start_matches(PREFIX).trim_end_matches('/');
        let segs: Vec<&str> = path.split('/').collect();
        match (req.method, segs.as_slice()) {
            (Method::Get, ["alignments"]) => {
                let jobs: Vec<Value> = state.jobs.values().map(to_value).collect();
                Ok(Reply::Json(Value::Array(jobs)))
            }
            (Method::Post, ["alignments"]) => {
                let body = req.body.clone().unwrap_or_default();
                let guid = format!("job-{}", state.jobs.len() + 1);
                let mut created = job(&guid, JobState::Init, 0, 0);
                created.name = body["name"].as_str().unwrap_or_default().to_string();
                state.jobs.insert(guid, created.clone());
                Ok(Reply::Json(to_value(&created)))
            }
            (Method::Delete, ["alignments", guid]) => match state.jobs.remove(*guid) {
                Some(_) => Ok(Reply::NoContent),
                None => Err(reject(404, "Alignment not found")),
            },
            (Method::Get, ["alignments", guid, "progress"]) => {
                if state.fail_progress {
                    return Err(reject(503, "Service unavailable"));
                }
                if let Some(next) = state
                    .progress_script
                    .get_mut(*guid)
                    .and_then(VecDeque::pop_front)
                {
                    state.jobs.insert(guid.to_string(), next);
                }
                state
                    .jobs
                    .get(*guid)
                    .map(|j| Reply::Json(to_value(j)))
                    .ok_or_else(|| reject(404, "Alignment not found"))
            }
            (Method::Post, ["alignments", guid, "align"]) => {
                if let Some((status, detail)) = state.fail_start.clone() {
                    return Err(reject(status, &detail));
                }
                let job = state
                    .jobs
                    .get_mut(*guid)
                    .ok_or_else(|| reject(404, "Alignment not found"))?;
                job.state = JobState::InProgress;
                Ok(Reply::Json(json!({"status": "started"})))
            }
            (Method::Post, ["alignments", guid, "align", "next"]) => {
                let job = state
                    .jobs
                    .get_mut(*guid)
                    .ok_or_else(|| reject(404, "Alignment not found"))?;
                job.state = JobState::InProgress;
                let script = std::mem::take(&mut state.next_script);
                state
                    .progress_script
                    .entry(guid.to_string())
                    .or_default()
                    .extend(script);
                Ok(Reply::Json(json!({"status": "started"})))
            }
            (Method::Post, ["alignments", guid, "align", "stop"]) => {
                let job = state
                    .jobs
                    .get_mut(*guid)
                    .ok_or_else(|| reject(404, "Alignment not found"))?;
                job.state = JobState::InProgressDone;
                state.progress_script.remove(*guid);
                Ok(Reply::Json(json!({"status": "stopped"})))
            }
            (Method::Get, ["alignments", _, "conflicts"]) => {
                Ok(Reply::Json(json!({"items": state.conflicts})))
            }
            (Method::Get, ["alignments", _, "conflicts", id]) => {
                let id: i64 = id.parse().unwrap_or(-1);
                let found = state
                    .conflicts
                    .iter()
                    .find(|c| c["id"] == json!(id))
                    .cloned()
                    .ok_or_else(|| reject(404, "Conflict not found"))?;
                let mut detail = found;
                detail["from"] = json!(["left a", "left b"]);
                detail["to"] = json!(["right a"]);
                detail["items"] = json!([
                    ["left a left b", "right a"],
                    ["left a", "left b right a"],
                ]);
                Ok(Reply::Json(detail))
            }
            (Method::Post, ["alignments", _, "resolve"]) => {
                if state.conflicts.is_empty() {
                    return Err(reject(409, "Nothing to resolve"));
                }
                state.conflicts = state.conflicts_after_resolve.take().unwrap_or_default();
                Ok(Reply::Json(json!({"status": "started"})))
            }
            (Method::Get, ["processing", _, "page"]) => {
                let count: usize = req.param("count").and_then(|v| v.parse().ok()).unwrap_or(50);
                let page: usize = req.param("page").and_then(|v| v.parse().ok()).unwrap_or(1);
                let total = state.item_count();
                let total_pages = total.div_ceil(count.max(1));
                let start = (page.max(1) - 1) * count;
                let items: Vec<Value> = (start..(start + count).min(total))
                    .map(|i| state.item(i))
                    .collect();
                Ok(Reply::Json(json!({
                    "items": items,
                    "meta": {"page": page, "total_pages": total_pages},
                })))
            }
            (Method::Get, ["processing", _, "meta"]) => Ok(Reply::Json(json!({
                "meta": {
                    "total_items": state.item_count(),
                    "lang_from": "en",
                    "lang_to": "de",
                    "batch_ids": (0..state.item_count().div_ceil(10)).collect::<Vec<_>>(),
                }
            }))),
            (Method::Get, ["processing", _, "index"]) => {
                let mut items = Vec::new();
                for (direction, lines) in [("from", &state.from_lines), ("to", &state.to_lines)] {
                    for (i, line) in lines.iter().enumerate() {
                        items.push(json!({
                            "id": line.id, "index_id": i, "text_type": direction, "text": line.text
                        }));
                    }
                }
                Ok(Reply::Json(json!({ "items": items })))
            }
            (Method::Post, ["processing", _, "edit"]) => {
                let body = req.body.clone().unwrap_or_default();
                let index = body["index_id"].as_u64().unwrap_or(u64::MAX) as usize;
                if index >= state.item_count() {
                    return Err(reject(404, "Item not found"));
                }
                if body["operation"] == "edit_line" {
                    let direction = body["text_type"].as_str().unwrap_or("to").to_string();
                    let text = body["text"].as_str().unwrap_or_default().to_string();
                    if let Some(line) = state.lines(&direction).get_mut(index) {
                        line.text = text;
                    }
                }
                state.edits.push(body);
                ok()
            }
            (Method::Post, ["processing", _, "split"]) => {
                let body = req.body.clone().unwrap_or_default();
                let direction = body["direction"].as_str().unwrap_or("from").to_string();
                let line_id = body["line_id"].as_i64().unwrap_or(-1);
                let lines = state.lines(&direction);
                let pos = lines
                    .iter()
                    .position(|l| l.id == line_id)
                    .ok_or_else(|| reject(404, "Line not found"))?;
                for line in lines.iter_mut().skip(pos + 1) {
                    line.id += 1;
                }
                lines[pos].text = body["part1"].as_str().unwrap_or_default().to_string();
                lines.insert(
                    pos + 1,
                    Line {
                        id: line_id + 1,
                        text: body["part2"].as_str().unwrap_or_default().to_string(),
                        exclude: false,
                    },
                );
                ok()
            }
            (Method::Get, ["processing", _, "candidates"]) => {
                let direction = req.param("text_type").unwrap_or("to").to_string();
                let index: i64 = req.param("index_id").and_then(|v| v.parse().ok()).unwrap_or(0);
                let number = |key: &str, default: i64| {
                    req.param(key).and_then(|v| v.parse().ok()).unwrap_or(default)
                };
                let (before, after) = (number("count_before", 10), number("count_after", 10));
                let shift = number("shift", 0);
                let (lo, hi) = ((index - before + shift).max(0), index + after + shift);
                let items: Vec<Value> = state
                    .lines(&direction)
                    .iter()
                    .filter(|l| l.id >= lo && l.id <= hi)
                    .map(|l| json!({"id": l.id, "text": l.text, "proxy": null}))
                    .collect();
                Ok(Reply::Json(json!({ "items": items })))
            }
            (Method::Get, ["processing", _, "splitted", direction]) => {
                let ids: Vec<i64> = req
                    .param("ids")
                    .and_then(|v| serde_json::from_str(v).ok())
                    .unwrap_or_default();
                let mut items = serde_json::Map::new();
                for line in state.lines(direction).iter().filter(|l| ids.contains(&l.id)) {
                    items.insert(
                        line.id.to_string(),
                        json!({"t": line.text, "p": "", "e": line.exclude}),
                    );
                }
                Ok(Reply::Json(json!({ "items": items })))
            }
            (Method::Post, ["processing", _, "exclude"]) => {
                let line_id: i64 = req.param("line_id").and_then(|v| v.parse().ok()).unwrap_or(-1);
                let direction = req.param("text_type").unwrap_or("from").to_string();
                if let Some(line) = state.lines(&direction).iter_mut().find(|l| l.id == line_id) {
                    line.exclude = !line.exclude;
                }
                ok()
            }
            (Method::Get, ["processing", _, "find", lang, line_id]) => {
                let direction = if *lang == "en" { "from" } else { "to" };
                let line_id: i64 = line_id.parse().unwrap_or(-1);
                let pos = state
                    .lines(direction)
                    .iter()
                    .position(|l| l.id == line_id)
                    .map_or(-1, |i| i as i64);
                Ok(Reply::Json(json!({ "pos": pos })))
            }
            (Method::Post, ["processing", _, "page", "by-ids"]) => {
                let ids: Vec<usize> = req
                    .body
                    .clone()
                    .and_then(|b| serde_json::from_value(b).ok())
                    .unwrap_or_default();
                let mut items = serde_json::Map::new();
                for i in ids.into_iter().filter(|&i| i < state.item_count()) {
                    let mut item = state.item(i);
                    if let Some(fields) = item.as_object_mut() {
                        fields.remove("index_id");
                    }
                    items.insert(i.to_string(), item);
                }
                Ok(Reply::Json(json!({
                    "items": items,
                    "proxy_from_dict": {},
                    "proxy_to_dict": {},
                })))
            }
            (Method::Post, ["export", _, "book", "preview"]) => {
                Ok(Reply::Json(json!({"items": "<html><body>book</body></html>"})))
            }
            _ => Err(reject(404, "Not Found")),
        }
    }
}

fn route_key(req: &ApiRequest) -> String {
    let method = match req.method {
        Method::Get => "GET",
        Method::Post => "POST",
        Method::Delete => "DELETE",
    };
    format!("{method} {}", req.path.trim_start_matches(PREFIX))
}

#[async_trait]
impl Transport for FakeServer {
    async fn request(&self, req: ApiRequest) -> Result<Reply> {
        *self.state().calls.entry(route_key(&req)).or_default() += 1;

        if req.method == Method::Post && req.path.ends_with("/align") {
            let gate = self.start_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                gate.notified().await;
            }
        }

        let mut state = self.state();
        self.route(&mut state, &req)
    }

    async fn upload(&self, path: &str, _form: UploadForm) -> Result<Reply> {
        let key = format!("POST {}", path.trim_start_matches(PREFIX));
        *self.state().calls.entry(key).or_default() += 1;
        ok()
    }

    async fn download(&self, req: ApiRequest) -> Result<Download> {
        *self.state().calls.entry(route_key(&req)).or_default() += 1;
        let state = self.state();
        let body: String = state
            .from_lines
            .iter()
            .zip(&state.to_lines)
            .map(|(a, b)| format!("{}\t{}\n", a.text, b.text))
            .collect();
        Ok(Download {
            file_name: Some("aligned.txt".to_string()),
            content_type: Some("text/plain".to_string()),
            bytes: Bytes::from(body),
        })
    }
}

/// Registry, controller and event receiver wired to one fake server.
pub struct Harness {
    pub server: Arc<FakeServer>,
    pub registry: Arc<JobRegistry>,
    pub controller: JobController,
    pub events: mpsc::UnboundedReceiver<JobEvent>,
}

impl Harness {
    pub fn new() -> Self {
        let server = FakeServer::new();
        let registry = Arc::new(JobRegistry::new(connect(Generation::Current, server.clone())));
        let (tx, events) = mpsc::unbounded_channel();
        let controller = JobController::with_events(registry.clone(), Duration::from_secs(5), tx);
        Self {
            server,
            registry,
            controller,
            events,
        }
    }

    /// Drain pending events.
    pub fn drain_events(&mut self) -> Vec<JobEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            out.push(ev);
        }
        out
    }
}
