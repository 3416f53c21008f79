//! CLI binary for docingest.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `IngestConfig`, drives one progress bar per document and prints one line
//! per finished document.

use anyhow::{Context, Result};
use clap::Parser;
use docingest::{
    ingest, AlwaysAuthorized, DocumentId, DocumentRecord, DocumentStatus, HttpSession,
    HttpTransport, IngestConfig, IngestObserver, Notification, SessionGate, UploadWorkflow,
};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Terminal observer: one bar per document while it uploads, a spinner
/// while it is processed, and one summary line when it reaches a terminal
/// state.
struct CliObserver {
    multi: MultiProgress,
    bars: Mutex<HashMap<DocumentId, ProgressBar>>,
    quiet: bool,
}

impl CliObserver {
    fn new(show_progress: bool, quiet: bool) -> Arc<Self> {
        let target = if show_progress {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        Arc::new(Self {
            multi: MultiProgress::with_draw_target(target),
            bars: Mutex::new(HashMap::new()),
            quiet,
        })
    }

    fn bars(&self) -> MutexGuard<'_, HashMap<DocumentId, ProgressBar>> {
        self.bars.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bar(&self, id: DocumentId) -> Option<ProgressBar> {
        self.bars().get(&id).cloned()
    }

    /// Clear the bars of documents that never got a notification (cancelled).
    fn clear_remaining(&self) -> usize {
        let bars: Vec<ProgressBar> = self.bars().drain().map(|(_, bar)| bar).collect();
        for bar in &bars {
            bar.finish_and_clear();
            self.multi.remove(bar);
        }
        bars.len()
    }

    /// Print above the bars (or plainly when they are hidden).
    fn println(&self, line: String) {
        if self.quiet {
            return;
        }
        if self.multi.is_hidden() {
            eprintln!("{line}");
        } else {
            let _ = self.multi.println(line);
        }
    }
}

fn upload_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:.bold}  [{bar:30.green/238}] {pos:>3}%  {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(TICKS)
}

fn processing_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(TICKS)
}

impl IngestObserver for CliObserver {
    fn on_document_created(&self, record: &DocumentRecord) {
        let bar = self.multi.add(ProgressBar::new(100));
        bar.set_style(upload_style());
        bar.set_prefix(record.name.clone());
        bar.set_message("uploading");
        bar.enable_steady_tick(Duration::from_millis(80));
        self.bars().insert(record.id, bar);
    }

    fn on_upload_progress(&self, id: DocumentId, percent: u8) {
        if let Some(bar) = self.bar(id) {
            bar.set_position(u64::from(percent));
        }
    }

    fn on_status_change(&self, record: &DocumentRecord, _from: DocumentStatus) {
        if record.status != DocumentStatus::Processing {
            return;
        }
        if let Some(bar) = self.bar(record.id) {
            bar.set_style(processing_style());
            let server = record
                .server_id
                .as_ref()
                .map(|s| format!(" (document {s})"))
                .unwrap_or_default();
            bar.set_message(format!("processing{server}"));
        }
    }

    fn on_detail_change(&self, record: &DocumentRecord) {
        if let (Some(bar), Some(detail)) = (self.bar(record.id), record.detail.as_deref()) {
            bar.set_message(format!("processing: {detail}"));
        }
    }

    fn on_notification(&self, record: &DocumentRecord, notification: &Notification) {
        if let Some(bar) = self.bars().remove(&record.id) {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
        let mark = match notification {
            Notification::Completed => green("✓"),
            Notification::Failed { .. } => red("✗"),
            Notification::Unknown { .. } => yellow("?"),
        };
        self.println(format!("  {} {}  {}", mark, bold(&record.name), notification));
    }

    fn on_transient_error(&self, id: DocumentId, message: &str) {
        let name = self.bar(id).map(|b| b.prefix()).unwrap_or_default();
        self.println(format!("  {} {}  {}", yellow("!"), name, dim(message)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Upload two local files and wait until both are processed
  docingest report.pdf notes.docx

  # Let the service fetch a document itself
  docingest https://example.com/whitepaper.pdf

  # Log in first (session cookie), print the final registry as JSON
  docingest --username alice --password secret --json *.pdf > result.json

  # Faster polling against a local service
  docingest --initial-delay-ms 500 --poll-interval-ms 1000 report.pdf

SUPPORTED INPUTS:
  PDF   application/pdf
  DOCX  application/vnd.openxmlformats-officedocument.wordprocessingml.document
  URL   any http:// or https:// address the service can reach

ENVIRONMENT VARIABLES:
  DOCINGEST_API_BASE_URL           Service base URL (default http://localhost:8080)
  DOCINGEST_API_TOKEN              Bearer token sent with every request
  DOCINGEST_USERNAME               Log in as this user before uploading
  DOCINGEST_PASSWORD               Password for DOCINGEST_USERNAME
  DOCINGEST_MAX_FILE_SIZE          Upload size limit in bytes (default 10485760)
  DOCINGEST_INITIAL_POLL_DELAY_MS  Wait before the first status query (default 3000)
  DOCINGEST_POLL_INTERVAL_MS       Wait between status queries (default 5000)
  DOCINGEST_POLL_TIMEOUT_MS        Deadline of one status query (default 15000)
  DOCINGEST_MAX_POLL_FAILURES      Consecutive failed polls before giving up (default 5)
  DOCINGEST_MAX_CONCURRENT_POLLS   Status requests in flight at once (default 8)

EXIT STATUS:
  0  every input was accepted and processed successfully
  1  at least one input was rejected, failed, or ended in an unknown state
"#;

/// Upload documents to a processing service and wait for them to be processed.
#[derive(Parser, Debug)]
#[command(
    name = "docingest",
    version,
    about = "Upload PDF/DOCX files or URLs to a document-processing service and track them",
    long_about = "Upload local PDF/DOCX files (or submit URLs for server-side fetching) to a \
document-processing service, show upload progress, and poll each document until the service \
reports it completed or failed.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file paths or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Base URL of the ingestion service.
    #[arg(long, env = "DOCINGEST_API_BASE_URL")]
    api_base_url: Option<String>,

    /// Bearer token sent with every request.
    #[arg(long, env = "DOCINGEST_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log in as this user before uploading (and log out afterwards).
    #[arg(long, env = "DOCINGEST_USERNAME", requires = "password")]
    username: Option<String>,

    /// Password for --username.
    #[arg(long, env = "DOCINGEST_PASSWORD", hide_env_values = true, requires = "username")]
    password: Option<String>,

    /// Maximum upload size in bytes.
    #[arg(long, env = "DOCINGEST_MAX_FILE_SIZE")]
    max_file_size: Option<u64>,

    /// Delay before the first status query, in milliseconds.
    #[arg(long, env = "DOCINGEST_INITIAL_POLL_DELAY_MS")]
    initial_delay_ms: Option<u64>,

    /// Delay between status queries, in milliseconds.
    #[arg(long, env = "DOCINGEST_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    /// Deadline of a single status query, in milliseconds.
    #[arg(long, env = "DOCINGEST_POLL_TIMEOUT_MS")]
    poll_timeout_ms: Option<u64>,

    /// Consecutive failed status queries before a document is marked unknown.
    #[arg(long, env = "DOCINGEST_MAX_POLL_FAILURES")]
    max_poll_failures: Option<u32>,

    /// Maximum number of status requests in flight at once.
    #[arg(long, env = "DOCINGEST_MAX_CONCURRENT_POLLS")]
    max_concurrent_polls: Option<usize>,

    /// Print the final state of every document as JSON on stdout.
    #[arg(long, env = "DOCINGEST_JSON")]
    json: bool,

    /// Disable progress bars.
    #[arg(long, env = "DOCINGEST_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCINGEST_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCINGEST_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs would tear the progress bars; the bars and the
    // per-document lines carry everything the user needs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let config = build_config(&cli)?;
    let transport =
        Arc::new(HttpTransport::new(&config).context("Failed to create HTTP client")?);

    // ── Session ──────────────────────────────────────────────────────────
    let session = match (&cli.username, &cli.password) {
        (Some(username), Some(password)) => {
            let session = Arc::new(HttpSession::new(&config, transport.client().clone()));
            let user = session
                .login(username, password)
                .await
                .context("Login failed")?;
            if !cli.quiet {
                eprintln!("{} Logged in as {}", green("✔"), bold(&user.display_name()));
            }
            Some(session)
        }
        _ => None,
    };
    let gate: Arc<dyn SessionGate> = match session {
        Some(ref s) => s.clone() as Arc<dyn SessionGate>,
        None => Arc::new(AlwaysAuthorized),
    };

    // ── Run ──────────────────────────────────────────────────────────────
    let observer = CliObserver::new(show_progress, cli.quiet || cli.json);
    let workflow = UploadWorkflow::builder(config, transport)
        .observer(observer.clone())
        .gate(gate)
        .build();

    let on_interrupt = workflow.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling all uploads");
            on_interrupt.shutdown();
        }
    });

    let report = ingest(&cli.inputs, &workflow)
        .await
        .context("Ingestion failed")?;
    let cancelled = observer.clear_remaining();
    if cancelled > 0 {
        warn!("{} document(s) cancelled before finishing", cancelled);
    }

    for rejected in &report.rejected {
        eprintln!("  {} {}  {}", red("✗"), bold(&rejected.input), red(&rejected.error.to_string()));
    }

    if let Some(ref session) = session {
        if let Err(e) = session.logout().await {
            warn!("Logout failed: {}", e);
        }
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&report.documents)
            .context("Failed to serialise documents")?;
        println!("{json}");
    }

    if !cli.quiet {
        let s = &report.stats;
        let mark = if report.all_completed() { green("✔") } else { red("✘") };
        eprintln!(
            "{}  {} completed  {} failed  {} unknown  {} rejected  {}",
            mark,
            bold(&s.completed.to_string()),
            s.failed,
            s.unknown,
            s.rejected,
            dim(&format!("{:.1}s", s.elapsed_ms as f64 / 1000.0)),
        );
    }

    Ok(if report.all_completed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Map CLI args onto `IngestConfig`; flags win over the environment.
fn build_config(cli: &Cli) -> Result<IngestConfig> {
    let mut builder = IngestConfig::from_env().context("Invalid environment configuration")?;

    if let Some(ref url) = cli.api_base_url {
        builder = builder.api_base_url(url);
    }
    if let Some(ref token) = cli.token {
        builder = builder.api_token(token);
    }
    if let Some(bytes) = cli.max_file_size {
        builder = builder.max_file_size_bytes(bytes);
    }
    if let Some(ms) = cli.initial_delay_ms {
        builder = builder.initial_poll_delay(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.poll_interval_ms {
        builder = builder.poll_interval(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.poll_timeout_ms {
        builder = builder.poll_timeout(Duration::from_millis(ms));
    }
    if let Some(n) = cli.max_poll_failures {
        builder = builder.max_poll_failures(n);
    }
    if let Some(n) = cli.max_concurrent_polls {
        builder = builder.max_concurrent_polls(n);
    }

    builder.build().context("Invalid configuration")
}
