use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::Generation;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    pub generation: Generation,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub user_agent: String,
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            generation: Generation::Current,
            poll_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            user_agent: format!("align-sync/{}", env!("CARGO_PKG_VERSION")),
            token: None,
        }
    }
}

/// Remote lifecycle state of an alignment job. Encoded as an integer on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum JobState {
    Init,
    InProgress,
    /// The requested batch window finished; more batches may be requested.
    InProgressDone,
    Done,
    Error,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Init => "INIT",
            JobState::InProgress => "IN_PROGRESS",
            JobState::InProgressDone => "IN_PROGRESS_DONE",
            JobState::Done => "DONE",
            JobState::Error => "ERROR",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Error)
    }

    /// Whether the server is expected to make progress without further input.
    pub fn is_running(self) -> bool {
        self == JobState::InProgress
    }

    /// Transitions the server may report without an explicit stop or error escape.
    /// `IN_PROGRESS_DONE -> IN_PROGRESS` is the "align next" loop.
    pub fn is_forward(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (a, b) if a == b => true,
            (_, Error) => !self.is_terminal(),
            (Init, InProgress | InProgressDone | Done) => true,
            (InProgress, InProgressDone | Done) => true,
            (InProgressDone, InProgress | Done) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl TryFrom<u8> for JobState {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, String> {
        match v {
            0 => Ok(JobState::Init),
            1 => Ok(JobState::InProgress),
            2 => Ok(JobState::InProgressDone),
            3 => Ok(JobState::Done),
            4 => Ok(JobState::Error),
            other => Err(format!("unknown alignment state {other}")),
        }
    }
}

impl From<JobState> for u8 {
    fn from(s: JobState) -> u8 {
        match s {
            JobState::Init => 0,
            JobState::InProgress => 1,
            JobState::InProgressDone => 2,
            JobState::Done => 3,
            JobState::Error => 4,
        }
    }
}

/// Snapshot of one alignment job as reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub guid: String,
    pub name: String,
    #[serde(default)]
    pub lang_from: String,
    #[serde(default)]
    pub lang_to: String,
    pub state: JobState,
    #[serde(default)]
    pub curr_batches: u32,
    #[serde(default)]
    pub total_batches: u32,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_uploaded: bool,
    #[serde(default)]
    pub proxy_from_loaded: bool,
    #[serde(default)]
    pub proxy_to_loaded: bool,
    #[serde(default)]
    pub document_from_id: i64,
    #[serde(default)]
    pub document_to_id: i64,
    #[serde(default)]
    pub created_at: String,
}

impl Job {
    /// `curr_batches <= total_batches` once the total is known.
    pub fn progress_is_consistent(&self) -> bool {
        self.total_batches == 0 || self.curr_batches <= self.total_batches
    }

    pub fn proxy_loaded(&self, direction: Direction) -> bool {
        match direction {
            Direction::From => self.proxy_from_loaded,
            Direction::To => self.proxy_to_loaded,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub document_from_guid: String,
    pub document_to_guid: String,
}

/// Text direction: the source (`from`) or target (`to`) document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    From,
    To,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::From => "from",
            Direction::To => "to",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Options for start and extend requests. Unset fields are omitted so the
/// server applies its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub align_all: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_ids: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_shift: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_proxy_from: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_proxy_to: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_count: Option<u32>,
}

impl AlignOptions {
    pub fn batches(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            batch_ids: Some(ids.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn amount(amount: u32) -> Self {
        Self {
            amount: Some(amount),
            ..Default::default()
        }
    }
}

/// Which batch edges the server should consider when collecting conflicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EdgeHandling {
    #[default]
    None,
    Start,
    Finish,
    Both,
}

impl EdgeHandling {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeHandling::None => "none",
            EdgeHandling::Start => "start",
            EdgeHandling::Finish => "finish",
            EdgeHandling::Both => "both",
        }
    }
}

/// Line ids on both sides that a conflict covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpan {
    #[serde(default, alias = "from")]
    pub from_ids: Vec<i64>,
    #[serde(default, alias = "to")]
    pub to_ids: Vec<i64>,
}

/// Typed conflict payload keyed by the wire `type` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ConflictKind {
    /// Ambiguous chain inside a batch.
    Chain(LineSpan),
    /// Ambiguity at the first lines of a batch window.
    Start(LineSpan),
    /// Ambiguity at the last lines of a batch window.
    Finish(LineSpan),
    Unrecognized { type_name: String, data: Value },
}

impl ConflictKind {
    pub fn from_wire(type_name: &str, data: Value) -> Self {
        let span = |data: &Value| serde_json::from_value::<LineSpan>(data.clone()).ok();
        let parsed = match type_name {
            "chain" => span(&data).map(ConflictKind::Chain),
            "start" => span(&data).map(ConflictKind::Start),
            "finish" => span(&data).map(ConflictKind::Finish),
            _ => None,
        };
        parsed.unwrap_or_else(|| ConflictKind::Unrecognized {
            type_name: type_name.to_string(),
            data,
        })
    }

    pub fn type_name(&self) -> &str {
        match self {
            ConflictKind::Chain(_) => "chain",
            ConflictKind::Start(_) => "start",
            ConflictKind::Finish(_) => "finish",
            ConflictKind::Unrecognized { type_name, .. } => type_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub id: i64,
    pub batch_id: i64,
    pub kind: ConflictKind,
}

/// One way of grouping the context fragments; a resolution picks one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateAlignment(pub Vec<String>);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictDetail {
    pub id: i64,
    pub batch_id: i64,
    pub kind: ConflictKind,
    /// Local context from the source document.
    pub left: Vec<String>,
    /// Local context from the target document.
    pub right: Vec<String>,
    pub candidates: Vec<CandidateAlignment>,
}

/// A resolution submission. Both observed request shapes go through this one type.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Re-run resolution over whole batches.
    Batches {
        batch_ids: Vec<i64>,
        use_proxy_from: bool,
        use_proxy_to: bool,
        handle_start: bool,
        handle_finish: bool,
    },
    /// Conflict-local key to chosen candidate index.
    Decisions(BTreeMap<String, usize>),
}

impl Resolution {
    pub fn batches(batch_ids: Vec<i64>) -> Self {
        Resolution::Batches {
            batch_ids,
            use_proxy_from: false,
            use_proxy_to: false,
            handle_start: false,
            handle_finish: false,
        }
    }
}

/// One aligned line pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingItem {
    /// Position in the flattened document index.
    pub index_id: i64,
    pub batch_id: i64,
    pub batch_index_id: i64,
    pub text_from: String,
    pub text_to: String,
    pub line_ids_from: Vec<i64>,
    pub line_ids_to: Vec<i64>,
    pub processing_from_id: i64,
    pub processing_to_id: i64,
}

impl ProcessingItem {
    pub fn line_ids(&self, direction: Direction) -> &[i64] {
        match direction {
            Direction::From => &self.line_ids_from,
            Direction::To => &self.line_ids_to,
        }
    }
}

/// A page as returned by the server, before workspace clamping.
#[derive(Debug, Clone, PartialEq)]
pub struct PageData {
    pub items: Vec<ProcessingItem>,
    pub page: u32,
    pub total_pages: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingMeta {
    pub total_items: u64,
    pub lang_from: String,
    pub lang_to: String,
    pub batch_ids: Vec<i64>,
}

/// Maps a sequential index id to one physical line in one direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocIndexEntry {
    /// Physical line id.
    pub id: i64,
    pub index_id: i64,
    #[serde(rename = "text_type")]
    pub direction: Direction,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateLine {
    /// Physical line id.
    pub id: i64,
    pub index_id: Option<i64>,
    pub text: String,
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateQuery {
    pub direction: Direction,
    pub index_id: i64,
    pub count_before: u32,
    pub count_after: u32,
    pub shift: i64,
}

impl CandidateQuery {
    pub fn new(direction: Direction, index_id: i64) -> Self {
        Self {
            direction,
            index_id,
            count_before: 10,
            count_after: 10,
            shift: 0,
        }
    }

    pub fn shifted(&self, delta: i64) -> Self {
        Self {
            shift: self.shift + delta,
            ..self.clone()
        }
    }
}

/// Addresses one processing item and says what to do with it.
#[derive(Debug, Clone, PartialEq)]
pub struct EditRequest {
    pub index_id: i64,
    pub batch_id: i64,
    pub batch_index_id: i64,
    pub direction: Direction,
    pub operation: EditOperation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditOperation {
    /// Replace the item's text on one side.
    EditLine { text: String },
    ClearLine,
    DeleteLine,
    /// Move this item's lines onto the end of the previous item.
    AppendToPrevious { text: String },
    /// Move this item's lines onto the end of the next item.
    AppendToNext { text: String },
    /// Re-target: attach a candidate line to this item.
    AppendCandidate {
        candidate_line_id: i64,
        candidate_text: String,
    },
    AddEmptyLineBefore,
    AddEmptyLineAfter,
    /// Re-link the item whose sole line is `line_id_from` (and its successor) to
    /// `line_id_to` (and its successor).
    RelinkLines { line_id_from: i64, line_id_to: i64 },
}

impl EditOperation {
    pub fn wire_name(&self) -> &'static str {
        match self {
            EditOperation::EditLine { .. } => "edit_line",
            EditOperation::ClearLine => "edit_clear_line",
            EditOperation::DeleteLine => "edit_delete_line",
            EditOperation::AppendToPrevious { .. } => "edit_add_prev_end",
            EditOperation::AppendToNext { .. } => "edit_add_next_end",
            EditOperation::AppendCandidate { .. } => "edit_add_candidate_end",
            EditOperation::AddEmptyLineBefore => "add_empty_line_before",
            EditOperation::AddEmptyLineAfter => "add_empty_line_after",
            EditOperation::RelinkLines { .. } => "edit_try_set_line_ids",
        }
    }

    /// Structural operations can renumber items and change the line mapping.
    pub fn is_structural(&self) -> bool {
        !matches!(self, EditOperation::EditLine { .. })
    }
}

/// Split one physical line in two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRequest {
    pub direction: Direction,
    pub line_id: i64,
    pub part1: String,
    pub part2: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingExport {
    pub format: String,
    pub side: Direction,
    pub paragraphs: bool,
    pub direction: Direction,
    pub left_lang: Direction,
}

impl ProcessingExport {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            side: Direction::From,
            paragraphs: false,
            direction: Direction::To,
            left_lang: Direction::From,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookOptions {
    pub format: String,
    pub theme: Option<String>,
    pub par_direction: Direction,
    pub left_lang: Direction,
}

impl BookOptions {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            theme: None,
            par_direction: Direction::To,
            left_lang: Direction::From,
        }
    }
}

/// A downloaded artifact. Contents are opaque to the sync core.
#[derive(Debug, Clone)]
pub struct Download {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl Download {
    /// Write the artifact into `dir`, using the server-provided name when present.
    pub fn save_into(&self, dir: &Path, fallback_name: &str) -> std::io::Result<PathBuf> {
        let name = self
            .file_name
            .as_deref()
            .and_then(|n| Path::new(n).file_name())
            .map(|n| n.to_owned())
            .unwrap_or_else(|| fallback_name.into());
        std::fs::create_dir_all(dir)?;
        let path = dir.join(name);
        std::fs::write(&path, &self.bytes)?;
        Ok(path)
    }
}

#[derive(Debug, Clone)]
pub enum JobEvent {
    Snapshot {
        // Box keeps the enum small; Job carries several strings.
        job: Box<Job>,
    },
    PollingStarted {
        guid: String,
    },
    PollingStopped {
        guid: String,
        reason: StopReason,
    },
    Info(InfoEvent),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// Stopped by the caller or replaced by a newer loop.
    Cancelled,
    /// A progress fetch failed; the loop does not retry.
    FetchFailed(String),
}

/// Structured info events emitted by the core and consumed by UI/CLI layers.
#[derive(Debug, Clone)]
pub enum InfoEvent {
    Message(String),
    Optimistic { guid: String, state: JobState },
    RolledBack { guid: String, state: JobState },
    IgnoredOptions { operation: &'static str, options: Vec<String> },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::Optimistic { guid, state } => {
                format!("{guid}: showing {state} until the server confirms")
            }
            InfoEvent::RolledBack { guid, state } => {
                format!("{guid}: request failed, restored confirmed state {state}")
            }
            InfoEvent::IgnoredOptions { operation, options } => {
                format!("{operation}: ignoring unsupported options {}", options.join(", "))
            }
        }
    }
}
