use crate::text_summary;
use align_sync::api::{connect, Generation};
use align_sync::lifecycle::JobController;
use align_sync::model::{
    AlignOptions, BookOptions, CandidateQuery, ClientConfig, Direction, EdgeHandling,
    EditOperation, EditRequest, JobEvent, JobState, NewJob, ProcessingExport, Resolution,
    SplitRequest,
};
use align_sync::processing::DEFAULT_PAGE_SIZE;
use align_sync::registry::JobRegistry;
use align_sync::transport::{HttpTransport, Session};
use align_sync::workbench::Workbench;
use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "align-sync",
    version,
    about = "Drive server-side document alignment jobs from the terminal"
)]
pub struct Cli {
    /// Base URL of the alignment server
    #[arg(
        long,
        env = "ALIGN_SYNC_BASE_URL",
        default_value = "http://localhost:8000",
        global = true
    )]
    pub base_url: String,

    /// Bearer token attached to every request
    #[arg(long, env = "ALIGN_SYNC_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// Wire-protocol generation spoken by the server
    #[arg(
        long,
        value_enum,
        env = "ALIGN_SYNC_PROTOCOL",
        default_value_t = Generation::Current,
        global = true
    )]
    pub protocol: Generation,

    /// Progress polling interval
    #[arg(long, default_value = "5s", global = true)]
    pub poll_interval: humantime::Duration,

    /// Per-request timeout
    #[arg(long, default_value = "30s", global = true)]
    pub timeout: humantime::Duration,

    /// Print JSON instead of text lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Log filter (e.g. `debug`, `align_sync=trace`); defaults to RUST_LOG or `warn`
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// List alignment jobs
    Jobs,
    /// Create a job aligning two uploaded documents
    Create {
        #[arg(long)]
        name: String,
        /// Source document guid
        #[arg(long)]
        from: String,
        /// Target document guid
        #[arg(long)]
        to: String,
    },
    /// Delete a job
    Delete { guid: String },
    /// Fetch the authoritative job snapshot
    Progress { guid: String },
    /// Start alignment
    Start {
        guid: String,
        /// Batch id to align (repeatable)
        #[arg(long = "batch")]
        batches: Vec<i64>,
        /// Restart from the first batch
        #[arg(long)]
        all: bool,
        #[command(flatten)]
        align: AlignArgs,
        /// Keep printing snapshots while the job runs
        #[arg(long)]
        watch: bool,
    },
    /// Align the next batches ("align next")
    Next {
        guid: String,
        /// Number of additional batches
        #[arg(long)]
        amount: Option<u32>,
        #[command(flatten)]
        align: AlignArgs,
        #[arg(long)]
        watch: bool,
    },
    /// Stop alignment and print the resulting snapshot
    Stop { guid: String },
    /// Poll a job and print snapshots until it leaves IN_PROGRESS
    Watch { guid: String },
    /// Upload a proxy document
    Proxy {
        guid: String,
        #[arg(long, value_enum)]
        direction: Direction,
        file: PathBuf,
    },
    /// List unresolved conflicts
    Conflicts {
        guid: String,
        #[arg(long, value_enum, default_value_t = EdgeHandling::None)]
        edges: EdgeHandling,
    },
    /// Show one conflict with its candidates
    Conflict {
        guid: String,
        id: i64,
        #[arg(long, value_enum, default_value_t = EdgeHandling::None)]
        edges: EdgeHandling,
    },
    /// Submit a conflict resolution
    Resolve {
        guid: String,
        /// Batch id to re-resolve (repeatable)
        #[arg(long = "batch")]
        batches: Vec<i64>,
        #[arg(long)]
        handle_start: bool,
        #[arg(long)]
        handle_finish: bool,
        #[arg(long)]
        proxy_from: bool,
        #[arg(long)]
        proxy_to: bool,
        /// Per-conflict decision KEY=CANDIDATE (repeatable)
        #[arg(long = "choose", value_parser = parse_choice, conflicts_with = "batches")]
        choices: Vec<(String, usize)>,
    },
    /// Print one page of aligned pairs
    Page {
        guid: String,
        #[arg(long, default_value_t = 50)]
        count: u32,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Print the page that shows a physical line
    Find {
        guid: String,
        #[arg(long, value_enum)]
        direction: Direction,
        #[arg(long)]
        line_id: i64,
    },
    /// Print processing meta
    Meta { guid: String },
    /// Print the document index
    Index { guid: String },
    /// Edit one processing item
    Edit(EditArgs),
    /// Split one physical line in two
    Split {
        guid: String,
        #[arg(long, value_enum)]
        direction: Direction,
        #[arg(long)]
        line_id: i64,
        #[arg(long)]
        part1: String,
        #[arg(long)]
        part2: String,
    },
    /// Print candidate lines around an index id
    Candidates {
        guid: String,
        #[arg(long, value_enum)]
        direction: Direction,
        #[arg(long)]
        index_id: i64,
        #[arg(long, default_value_t = 10)]
        before: u32,
        #[arg(long, default_value_t = 10)]
        after: u32,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        shift: i64,
    },
    /// Exclude a physical line from alignment (or include it again)
    Exclude {
        guid: String,
        #[arg(long, value_enum)]
        direction: Direction,
        #[arg(long, visible_alias = "index-id")]
        line_id: i64,
        /// Include the line instead of excluding it
        #[arg(long)]
        include: bool,
    },
    /// Export results
    #[command(subcommand)]
    Export(ExportCommand),
}

#[derive(Debug, Args, Clone, Default)]
pub struct AlignArgs {
    #[arg(long, allow_hyphen_values = true)]
    pub batch_shift: Option<i64>,
    #[arg(long)]
    pub window: Option<u32>,
    /// Use the uploaded source proxy
    #[arg(long)]
    pub proxy_from: bool,
    /// Use the uploaded target proxy
    #[arg(long)]
    pub proxy_to: bool,
    #[arg(long)]
    pub batch_size: Option<u32>,
    #[arg(long)]
    pub batch_count: Option<u32>,
}

impl AlignArgs {
    fn options(&self) -> AlignOptions {
        AlignOptions {
            batch_shift: self.batch_shift,
            window: self.window,
            use_proxy_from: self.proxy_from.then_some(true),
            use_proxy_to: self.proxy_to.then_some(true),
            batch_size: self.batch_size,
            batch_count: self.batch_count,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EditKind {
    Text,
    Clear,
    Delete,
    AppendPrev,
    AppendNext,
    AppendCandidate,
    EmptyBefore,
    EmptyAfter,
    Relink,
}

#[derive(Debug, Args, Clone)]
pub struct EditArgs {
    pub guid: String,
    #[arg(long)]
    pub index_id: i64,
    #[arg(long)]
    pub batch_id: i64,
    #[arg(long)]
    pub batch_index_id: i64,
    #[arg(long, value_enum)]
    pub direction: Direction,
    #[arg(long, value_enum, default_value_t = EditKind::Text)]
    pub op: EditKind,
    #[arg(long)]
    pub text: Option<String>,
    #[arg(long)]
    pub candidate_line_id: Option<i64>,
    #[arg(long)]
    pub line_id_from: Option<i64>,
    #[arg(long)]
    pub line_id_to: Option<i64>,
}

impl EditArgs {
    fn operation(&self) -> Result<EditOperation> {
        let text = || {
            self.text
                .clone()
                .ok_or_else(|| anyhow!("--text is required for this operation"))
        };
        Ok(match self.op {
            EditKind::Text => EditOperation::EditLine { text: text()? },
            EditKind::Clear => EditOperation::ClearLine,
            EditKind::Delete => EditOperation::DeleteLine,
            EditKind::AppendPrev => EditOperation::AppendToPrevious { text: text()? },
            EditKind::AppendNext => EditOperation::AppendToNext { text: text()? },
            EditKind::AppendCandidate => EditOperation::AppendCandidate {
                candidate_line_id: self
                    .candidate_line_id
                    .ok_or_else(|| anyhow!("--candidate-line-id is required"))?,
                candidate_text: text()?,
            },
            EditKind::EmptyBefore => EditOperation::AddEmptyLineBefore,
            EditKind::EmptyAfter => EditOperation::AddEmptyLineAfter,
            EditKind::Relink => EditOperation::RelinkLines {
                line_id_from: self
                    .line_id_from
                    .ok_or_else(|| anyhow!("--line-id-from is required"))?,
                line_id_to: self
                    .line_id_to
                    .ok_or_else(|| anyhow!("--line-id-to is required"))?,
            },
        })
    }
}

#[derive(Debug, Subcommand, Clone)]
pub enum ExportCommand {
    /// Download the aligned processing
    Processing {
        guid: String,
        #[arg(long)]
        format: String,
        #[arg(long, value_enum, default_value_t = Direction::From)]
        side: Direction,
        #[arg(long)]
        paragraphs: bool,
        #[arg(long, value_enum, default_value_t = Direction::To)]
        direction: Direction,
        #[arg(long, value_enum, default_value_t = Direction::From)]
        left_lang: Direction,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Render a book preview (HTML)
    Preview {
        guid: String,
        #[arg(long, default_value = "html")]
        format: String,
        #[arg(long)]
        theme: Option<String>,
        /// Write the preview into this directory instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Download the rendered book
    Book {
        guid: String,
        #[arg(long, default_value = "html")]
        format: String,
        #[arg(long)]
        theme: Option<String>,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

fn parse_choice(s: &str) -> std::result::Result<(String, usize), String> {
    let (key, idx) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=CANDIDATE, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty conflict key in '{s}'"));
    }
    let idx = idx
        .parse::<usize>()
        .map_err(|e| format!("bad candidate index in '{s}': {e}"))?;
    Ok((key.to_string(), idx))
}

/// Build a `ClientConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> ClientConfig {
    ClientConfig {
        base_url: args.base_url.clone(),
        generation: args.protocol,
        poll_interval: Duration::from(args.poll_interval),
        request_timeout: Duration::from(args.timeout),
        token: args.token.clone().filter(|t| !t.is_empty()),
        ..Default::default()
    }
}

/// Text or JSON rendering over the output writer.
struct Printer {
    tx: mpsc::UnboundedSender<OutputLine>,
    json: bool,
}

impl Printer {
    fn line(&self, msg: impl Into<String>) {
        let _ = self.tx.send(OutputLine::Stdout(msg.into()));
    }

    fn note(&self, msg: impl Into<String>) {
        let _ = self.tx.send(OutputLine::Stderr(msg.into()));
    }

    fn show<T: Serialize + ?Sized>(
        &self,
        value: &T,
        text: impl FnOnce() -> text_summary::TextSummary,
    ) -> Result<()> {
        if self.json {
            self.line(serde_json::to_string_pretty(value)?);
        } else {
            for line in text().lines {
                self.line(line);
            }
        }
        Ok(())
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let session = Session::new(cfg.token.clone());
    let transport =
        HttpTransport::new(&cfg, session).context("failed to build the HTTP client")?;
    let api = connect(cfg.generation, Arc::new(transport));
    let registry = Arc::new(JobRegistry::new(api));
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<JobEvent>();
    let controller = JobController::with_events(registry, cfg.poll_interval, evt_tx);
    let mut bench = Workbench::new(controller.clone());

    let (out_tx, out_handle) = spawn_output_writer();
    let printer = Printer {
        tx: out_tx,
        json: args.json,
    };

    let res = dispatch(&args.command, &mut bench, &printer, &mut evt_rx).await;
    controller.shutdown();

    // Surface info events (rollbacks, ignored options) emitted along the way.
    while let Ok(ev) = evt_rx.try_recv() {
        if let JobEvent::Info(info) = ev {
            printer.note(info.to_message());
        }
    }

    drop(printer);
    let _ = out_handle.await;
    res
}

async fn dispatch(
    command: &Command,
    bench: &mut Workbench,
    out: &Printer,
    events: &mut mpsc::UnboundedReceiver<JobEvent>,
) -> Result<()> {
    match command {
        Command::Jobs => {
            let jobs = bench
                .registry()
                .refresh_all()
                .await
                .context("failed to list jobs")?;
            out.show(&jobs, || text_summary::job_table(&jobs))
        }
        Command::Create { name, from, to } => {
            let job = bench
                .registry()
                .create(&NewJob {
                    name: name.clone(),
                    document_from_guid: from.clone(),
                    document_to_guid: to.clone(),
                })
                .await
                .context("failed to create job")?;
            out.show(&job, || text_summary::job_summary(&job, None))
        }
        Command::Delete { guid } => {
            bench
                .registry()
                .delete(guid)
                .await
                .with_context(|| format!("failed to delete {guid}"))?;
            out.note(format!("Deleted {guid}"));
            Ok(())
        }
        Command::Progress { guid } => {
            let job = bench.controller().refresh(guid).await?;
            let synced = bench.registry().tracked(guid).map(|t| t.synced_at());
            out.show(&job, || text_summary::job_summary(&job, synced))
        }
        Command::Start {
            guid,
            batches,
            all,
            align,
            watch,
        } => {
            bench.select(guid).await?;
            let mut opts = align.options();
            if !batches.is_empty() {
                opts.batch_ids = Some(batches.clone());
            }
            opts.align_all = all.then_some(true);
            bench
                .controller()
                .start(guid, &opts)
                .await
                .with_context(|| format!("failed to start {guid}"))?;
            out.note(format!("Started {guid}"));
            if *watch {
                watch_job(bench.controller(), guid, out, events).await?;
            }
            Ok(())
        }
        Command::Next {
            guid,
            amount,
            align,
            watch,
        } => {
            bench.select(guid).await?;
            let mut opts = align.options();
            opts.amount = *amount;
            bench
                .controller()
                .extend(guid, &opts)
                .await
                .with_context(|| format!("failed to extend {guid}"))?;
            out.note(format!("Requested more batches for {guid}"));
            if *watch {
                watch_job(bench.controller(), guid, out, events).await?;
            }
            Ok(())
        }
        Command::Stop { guid } => {
            bench.select(guid).await?;
            let job = bench
                .controller()
                .stop(guid)
                .await
                .with_context(|| format!("failed to stop {guid}"))?;
            out.show(&job, || text_summary::job_summary(&job, None))
        }
        Command::Watch { guid } => {
            let job = bench.controller().refresh(guid).await?;
            out.show(&job, || text_summary::job_summary(&job, None))?;
            if job.state.is_running() {
                bench.controller().start_polling(guid);
                watch_job(bench.controller(), guid, out, events).await?;
            }
            Ok(())
        }
        Command::Proxy {
            guid,
            direction,
            file,
        } => {
            let bytes = std::fs::read(file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "proxy.txt".to_string());
            let job = bench
                .registry()
                .upload_proxy(guid, *direction, &file_name, Bytes::from(bytes))
                .await
                .context("failed to upload proxy")?;
            out.show(&job, || text_summary::job_summary(&job, None))
        }
        Command::Conflicts { guid, edges } => {
            bench.select(guid).await?;
            let ws = bench.conflicts()?;
            ws.set_edges(*edges);
            let list = ws.refresh().await.context("failed to fetch conflicts")?;
            out.show(list, || text_summary::conflict_list(list))
        }
        Command::Conflict { guid, id, edges } => {
            bench.select(guid).await?;
            let ws = bench.conflicts()?;
            ws.set_edges(*edges);
            let detail = ws
                .detail(*id)
                .await
                .with_context(|| format!("failed to fetch conflict {id}"))?;
            out.show(detail, || text_summary::conflict_detail(detail))
        }
        Command::Resolve {
            guid,
            batches,
            handle_start,
            handle_finish,
            proxy_from,
            proxy_to,
            choices,
        } => {
            let resolution = if !choices.is_empty() {
                Resolution::Decisions(choices.iter().cloned().collect::<BTreeMap<_, _>>())
            } else if !batches.is_empty() {
                Resolution::Batches {
                    batch_ids: batches.clone(),
                    use_proxy_from: *proxy_from,
                    use_proxy_to: *proxy_to,
                    handle_start: *handle_start,
                    handle_finish: *handle_finish,
                }
            } else {
                bail!("pass --batch or --choose");
            };
            bench.select(guid).await?;
            let remaining = bench
                .conflicts()?
                .resolve(&resolution)
                .await
                .context("failed to resolve conflicts")?;
            out.show(remaining, || text_summary::conflict_list(remaining))
        }
        Command::Page { guid, count, page } => {
            bench.select(guid).await?;
            let view = bench.processing()?.fetch_page(*count, *page).await?;
            let value = serde_json::json!({
                "page": view.page,
                "total_pages": view.total_pages,
                "items": view.items,
            });
            out.show(&value, || text_summary::page(view))
        }
        Command::Find {
            guid,
            direction,
            line_id,
        } => {
            bench.select(guid).await?;
            let ws = bench.processing()?;
            let Some(page) = ws
                .locate_line(*direction, *line_id)
                .await
                .with_context(|| format!("failed to locate line {line_id}"))?
            else {
                bail!("line {line_id} ({direction}) is not in the document index");
            };
            let view = ws.fetch_page(DEFAULT_PAGE_SIZE, page).await?;
            out.note(format!("Line {line_id} ({direction}) is on page {page}"));
            out.show(&view.items, || text_summary::page(view))
        }
        Command::Meta { guid } => {
            bench.select(guid).await?;
            let meta = bench.processing()?.fetch_meta().await?;
            out.show(meta, || text_summary::meta(meta))
        }
        Command::Index { guid } => {
            bench.select(guid).await?;
            let index = bench.processing()?.fetch_doc_index().await?;
            out.show(index, || text_summary::doc_index(index))
        }
        Command::Edit(edit) => {
            let req = EditRequest {
                index_id: edit.index_id,
                batch_id: edit.batch_id,
                batch_index_id: edit.batch_index_id,
                direction: edit.direction,
                operation: edit.operation()?,
            };
            bench.select(&edit.guid).await?;
            bench
                .processing()?
                .edit(&req)
                .await
                .context("edit failed")?;
            out.note(format!("Applied {}", req.operation.wire_name()));
            Ok(())
        }
        Command::Split {
            guid,
            direction,
            line_id,
            part1,
            part2,
        } => {
            bench.select(guid).await?;
            let req = SplitRequest {
                direction: *direction,
                line_id: *line_id,
                part1: part1.clone(),
                part2: part2.clone(),
            };
            bench
                .processing()?
                .split(&req)
                .await
                .context("split failed")?;
            out.note(format!("Split line {line_id} ({direction})"));
            Ok(())
        }
        Command::Candidates {
            guid,
            direction,
            index_id,
            before,
            after,
            shift,
        } => {
            bench.select(guid).await?;
            let query = CandidateQuery {
                count_before: *before,
                count_after: *after,
                shift: *shift,
                ..CandidateQuery::new(*direction, *index_id)
            };
            let lines = bench.processing()?.candidates(query).await?;
            out.show(lines, || text_summary::candidates(lines))
        }
        Command::Exclude {
            guid,
            direction,
            line_id,
            include,
        } => {
            bench.select(guid).await?;
            bench
                .processing()?
                .set_excluded(*direction, *line_id, !include)
                .await
                .context("failed to change the exclude flag")?;
            let verb = if *include { "Included" } else { "Excluded" };
            out.note(format!("{verb} line {line_id} ({direction})"));
            Ok(())
        }
        Command::Export(target) => export(target, bench, out).await,
    }
}

async fn export(target: &ExportCommand, bench: &mut Workbench, out: &Printer) -> Result<()> {
    match target {
        ExportCommand::Processing {
            guid,
            format,
            side,
            paragraphs,
            direction,
            left_lang,
            out: dir,
        } => {
            bench.select(guid).await?;
            let opts = ProcessingExport {
                side: *side,
                paragraphs: *paragraphs,
                direction: *direction,
                left_lang: *left_lang,
                ..ProcessingExport::new(format.clone())
            };
            let file = bench.exporter()?.processing(&opts).await?;
            let path = file
                .save_into(dir, &format!("{guid}.{format}"))
                .context("failed to save export")?;
            out.note(format!("Saved: {}", path.display()));
            Ok(())
        }
        ExportCommand::Preview {
            guid,
            format,
            theme,
            out: dir,
        } => {
            bench.select(guid).await?;
            let opts = BookOptions {
                theme: theme.clone(),
                ..BookOptions::new(format.clone())
            };
            let html = bench.exporter()?.preview(&opts).await?;
            match dir {
                Some(dir) => {
                    std::fs::create_dir_all(dir)?;
                    let path = dir.join(format!("{guid}-preview.html"));
                    std::fs::write(&path, html)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    out.note(format!("Saved: {}", path.display()));
                }
                None => out.line(html),
            }
            Ok(())
        }
        ExportCommand::Book {
            guid,
            format,
            theme,
            out: dir,
        } => {
            bench.select(guid).await?;
            let opts = BookOptions {
                theme: theme.clone(),
                ..BookOptions::new(format.clone())
            };
            let file = bench.exporter()?.book(&opts).await?;
            let path = file
                .save_into(dir, &format!("{guid}-book.{format}"))
                .context("failed to save book")?;
            out.note(format!("Saved: {}", path.display()));
            Ok(())
        }
    }
}

/// Print snapshots for `guid` until polling stops, the job leaves
/// `IN_PROGRESS`, or Ctrl-C.
async fn watch_job(
    controller: &JobController,
    guid: &str,
    out: &Printer,
    events: &mut mpsc::UnboundedReceiver<JobEvent>,
) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                controller.cancel_polling(guid);
                out.note("Interrupted");
                return Ok(());
            }
            ev = events.recv() => {
                let Some(ev) = ev else { return Ok(()) };
                match ev {
                    JobEvent::Snapshot { job } if job.guid == guid => {
                        out.show(&*job, || text_summary::progress_line(&job))?;
                        if job.state != JobState::InProgress {
                            controller.cancel_polling(guid);
                            return Ok(());
                        }
                    }
                    JobEvent::PollingStopped { guid: stopped, reason } if stopped == guid => {
                        out.note(format!("Polling stopped: {reason:?}"));
                        return Ok(());
                    }
                    JobEvent::Info(info) => out.note(info.to_message()),
                    _ => {}
                }
            }
        }
    }
}
