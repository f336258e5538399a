//! Text rendering for CLI output.
//!
//! Each function returns pre-formatted lines; the caller routes them to stdout.

use align_sync::model::{
    CandidateLine, Conflict, ConflictDetail, ConflictKind, DocIndexEntry, Job, ProcessingMeta,
};
use align_sync::processing::PageView;
use time::macros::format_description;
use time::OffsetDateTime;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

impl From<Vec<String>> for TextSummary {
    fn from(lines: Vec<String>) -> Self {
        Self { lines }
    }
}

fn batches(job: &Job) -> String {
    if job.total_batches == 0 {
        format!("{}/?", job.curr_batches)
    } else {
        format!("{}/{}", job.curr_batches, job.total_batches)
    }
}

fn excerpt(text: &str, max: usize) -> String {
    let text = text.replace('\n', " ");
    if text.chars().count() <= max {
        return text;
    }
    let cut: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}…")
}

fn ids(ids: &[i64]) -> String {
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

pub(crate) fn job_table(jobs: &[Job]) -> TextSummary {
    if jobs.is_empty() {
        return vec!["No jobs".to_string()].into();
    }
    jobs.iter()
        .map(|j| {
            format!(
                "{:<36}  {:<16}  {:>9}  {}-{}  {}",
                j.guid,
                j.state,
                batches(j),
                j.lang_from,
                j.lang_to,
                j.name
            )
        })
        .collect::<Vec<_>>()
        .into()
}

pub(crate) fn job_summary(job: &Job, synced_at: Option<OffsetDateTime>) -> TextSummary {
    let mut lines = vec![
        format!("Job:      {} ({})", job.name, job.guid),
        format!("Langs:    {} -> {}", job.lang_from, job.lang_to),
        format!("State:    {}", job.state),
        format!("Batches:  {}", batches(job)),
        format!(
            "Proxy:    from={} to={}",
            job.proxy_loaded(align_sync::model::Direction::From),
            job.proxy_loaded(align_sync::model::Direction::To)
        ),
    ];
    if !job.created_at.is_empty() {
        lines.push(format!("Created:  {}", job.created_at));
    }
    if let Some(ts) = synced_at {
        let fmt = format_description!("[hour]:[minute]:[second]");
        if let Ok(s) = ts.format(&fmt) {
            lines.push(format!("Synced:   {s} UTC"));
        }
    }
    lines.into()
}

pub(crate) fn progress_line(job: &Job) -> TextSummary {
    vec![format!("{}  {}  batches {}", job.guid, job.state, batches(job))].into()
}

fn kind_line(kind: &ConflictKind) -> String {
    match kind {
        ConflictKind::Chain(span) | ConflictKind::Start(span) | ConflictKind::Finish(span) => {
            format!(
                "{} from [{}] to [{}]",
                kind.type_name(),
                ids(&span.from_ids),
                ids(&span.to_ids)
            )
        }
        ConflictKind::Unrecognized { type_name, data } => format!("{type_name} {data}"),
    }
}

pub(crate) fn conflict_list(conflicts: &[Conflict]) -> TextSummary {
    if conflicts.is_empty() {
        return vec!["No unresolved conflicts".to_string()].into();
    }
    conflicts
        .iter()
        .map(|c| format!("#{:<5} batch {:<4} {}", c.id, c.batch_id, kind_line(&c.kind)))
        .collect::<Vec<_>>()
        .into()
}

pub(crate) fn conflict_detail(detail: &ConflictDetail) -> TextSummary {
    let mut lines = vec![format!(
        "Conflict #{} (batch {}): {}",
        detail.id,
        detail.batch_id,
        kind_line(&detail.kind)
    )];
    lines.push("Left:".to_string());
    lines.extend(detail.left.iter().map(|s| format!("  {}", excerpt(s, 100))));
    lines.push("Right:".to_string());
    lines.extend(detail.right.iter().map(|s| format!("  {}", excerpt(s, 100))));
    lines.push("Candidates:".to_string());
    for (i, cand) in detail.candidates.iter().enumerate() {
        lines.push(format!("  [{i}] {}", cand.0.join(" | ")));
    }
    lines.into()
}

pub(crate) fn page(view: &PageView) -> TextSummary {
    let mut lines = vec![format!(
        "Page {}/{} ({} per page)",
        view.page, view.total_pages, view.page_size
    )];
    if view.items.is_empty() {
        lines.push("(no items)".to_string());
    }
    for item in &view.items {
        lines.push(format!(
            "{:>6}  [{}] {}",
            item.index_id,
            ids(&item.line_ids_from),
            excerpt(&item.text_from, 60)
        ));
        lines.push(format!(
            "{:>6}  [{}] {}",
            "",
            ids(&item.line_ids_to),
            excerpt(&item.text_to, 60)
        ));
    }
    lines.into()
}

pub(crate) fn meta(meta: &ProcessingMeta) -> TextSummary {
    let mut lines = vec![
        format!("Items:    {}", meta.total_items),
        format!("Langs:    {} -> {}", meta.lang_from, meta.lang_to),
    ];
    if !meta.batch_ids.is_empty() {
        lines.push(format!("Batches:  {}", ids(&meta.batch_ids)));
    }
    lines.into()
}

pub(crate) fn doc_index(index: &[DocIndexEntry]) -> TextSummary {
    index
        .iter()
        .map(|e| {
            format!(
                "{:>6}  {:<4} line {:<6} {}",
                e.index_id,
                e.direction,
                e.id,
                excerpt(&e.text, 60)
            )
        })
        .collect::<Vec<_>>()
        .into()
}

pub(crate) fn candidates(lines: &[CandidateLine]) -> TextSummary {
    lines
        .iter()
        .map(|c| match &c.proxy {
            Some(proxy) => format!(
                "{:>6}  {}  ({})",
                c.id,
                excerpt(&c.text, 60),
                excerpt(proxy, 40)
            ),
            None => format!("{:>6}  {}", c.id, excerpt(&c.text, 60)),
        })
        .collect::<Vec<_>>()
        .into()
}
