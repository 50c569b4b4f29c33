//! CLI binary for edgequake-pdfqa.
//!
//! A thin shim over the library crate: ingests the given PDFs, answers one
//! question (or many, in `--interactive` mode) and prints the answer, its
//! references and the paths of the highlighted evidence pages.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdfqa::{
    QaConfig, QaEngine, QaError, QueryResponse, Terminal, ThreadId, TurnOutput, WorkflowObserver,
    WorkflowState,
};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Spinner observer using indicatif ─────────────────────────────────────────

/// Terminal observer: one spinner per turn whose prefix follows the
/// workflow state, plus a log line for each rewrite.
struct CliObserver {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bar: Mutex::new(None),
        })
    }

    fn finish(&self) -> Option<ProgressBar> {
        let bar = self.bar.lock().take();
        if let Some(ref b) = bar {
            b.finish_and_clear();
        }
        bar
    }
}

impl WorkflowObserver for CliObserver {
    fn on_turn_start(&self, _thread: &ThreadId, question: &str) {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("thinking");
        bar.set_message(truncate(question, 60));
        bar.enable_steady_tick(Duration::from_millis(80));
        if let Some(old) = self.bar.lock().replace(bar) {
            old.finish_and_clear();
        }
    }

    fn on_state_enter(&self, _thread: &ThreadId, state: WorkflowState) {
        if let Some(ref bar) = *self.bar.lock() {
            if state == WorkflowState::Rewrite {
                bar.println(format!("  {} context not relevant, rewriting the question", cyan("↻")));
            }
            bar.set_prefix(state.to_string());
        }
    }

    fn on_turn_complete(&self, _thread: &ThreadId, terminal: Terminal, rewrites: u32) {
        if self.finish().is_some() {
            let how = match terminal {
                Terminal::DoneDirect => "answered directly".to_string(),
                Terminal::Done if rewrites == 0 => "answered from the documents".to_string(),
                Terminal::Done => format!("answered after {rewrites} rewrite(s)"),
            };
            eprintln!("{} {}", green("✔"), dim(&how));
        }
    }

    fn on_turn_error(&self, _thread: &ThreadId, error: &QaError) {
        if self.finish().is_some() {
            eprintln!("{} {}", red("✘"), red(&truncate(&error.to_string(), 80)));
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}\u{2026}")
    } else {
        s.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One question over one document
  pdfqa -f attention.pdf "What is multi-head attention?"

  # Several documents, JSON output (answer, references, image paths)
  pdfqa -f a.pdf -f b.pdf --json "Compare the two training setups"

  # Interactive session: follow-up questions share one thread
  pdfqa -f attention.pdf --interactive

  # Skip evidence rendering
  pdfqa -f attention.pdf --no-evidence "Who are the authors?"

  # Stricter evidence matching, higher resolution pages
  pdfqa -f attention.pdf --threshold 70 --dpi 200 "What is the BLEU score?"

EVIDENCE IMAGES:
  Each cited page is rendered once with the matching text blocks outlined
  in red and written to the output directory as output_page_<n>.png
  (output_page_<n>_<k>.png when several documents cite the same page).

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)

SETUP:
  1. Set API key:     export OPENAI_API_KEY=sk-...
  2. Ask:             pdfqa -f document.pdf "your question"

  The model must support tool calling; retrieval is offered as a tool.
"#;

/// Ask questions over PDF documents and get cited, highlighted answers.
#[derive(Parser, Debug)]
#[command(
    name = "pdfqa",
    version,
    about = "Ask questions over PDF documents and get cited, highlighted answers",
    long_about = "Ingest one or more PDF documents, answer questions about them with an LLM \
agent that decides when to retrieve, grades what it retrieved and rewrites the question when \
needed, and render every cited page with the supporting text outlined in red. Supports OpenAI, \
Anthropic, Google Gemini, Azure OpenAI, and any OpenAI-compatible endpoint.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Question to ask. Omit with --interactive.
    question: Option<String>,

    /// PDF file to ingest (repeatable).
    #[arg(short, long = "file", required = true, num_args = 1)]
    files: Vec<PathBuf>,

    /// Read questions from stdin, one per line, on a single thread.
    #[arg(short, long)]
    interactive: bool,

    /// LLM model ID (e.g. gpt-4.1-mini, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Directory for the rendered evidence pages.
    #[arg(short, long, env = "PDFQA_OUTPUT_DIR", default_value = "temp_images")]
    output_dir: PathBuf,

    /// Minimum similarity (0–100) for a text block to be highlighted.
    #[arg(long, env = "PDFQA_THRESHOLD", default_value_t = 50,
          value_parser = clap::value_parser!(u8).range(0..=100))]
    threshold: u8,

    /// Evidence rendering DPI (72–400).
    #[arg(long, env = "PDFQA_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Retries per model or retrieval call on transient failure.
    #[arg(long, env = "PDFQA_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Question rewrites allowed per turn before giving up.
    #[arg(long, env = "PDFQA_MAX_REWRITES", default_value_t = 3)]
    max_rewrites: u32,

    /// Retrieved chunks per query.
    #[arg(long, env = "PDFQA_TOP_K", default_value_t = 4)]
    top_k: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDFQA_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDFQA_PASSWORD")]
    password: Option<String>,

    /// Answer only; do not render evidence pages.
    #[arg(long, env = "PDFQA_NO_EVIDENCE")]
    no_evidence: bool,

    /// Output structured JSON (QueryResponse) instead of text.
    #[arg(long, env = "PDFQA_JSON")]
    json: bool,

    /// Disable the spinner.
    #[arg(long, env = "PDFQA_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFQA_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and answers.
    #[arg(short, long, env = "PDFQA_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
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

    if cli.question.is_none() && !cli.interactive {
        anyhow::bail!("Provide a question, or use --interactive");
    }

    let config = build_config(&cli, show_progress)?;
    let engine = QaEngine::from_config(config).context("Failed to initialise the LLM provider")?;

    // ── Ingest ───────────────────────────────────────────────────────────
    let summary = engine
        .ingest(cli.files.as_slice())
        .await
        .context("Failed to ingest documents")?;
    if !cli.quiet && !cli.json {
        eprintln!(
            "{} {} documents  {}  {}",
            cyan("◆"),
            bold(&summary.documents.to_string()),
            dim(&format!("{} pages", summary.pages)),
            dim(&format!("{} chunks", summary.chunks)),
        );
    }

    // Ctrl-C cancels the turn in flight instead of killing the process.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    if let Some(ref question) = cli.question {
        answer(&engine, &cli, question, ThreadId::new(), &cancel).await?;
    }
    if cli.interactive {
        repl(&engine, &cli, &cancel).await?;
    }

    Ok(())
}

/// Read questions line by line; every question continues the same thread.
async fn repl(engine: &QaEngine, cli: &Cli, cancel: &CancellationToken) -> Result<()> {
    let thread = ThreadId::new();
    if !cli.quiet && !cli.json {
        eprintln!("{}", dim(&format!("thread {thread}  (empty line or Ctrl-D to quit)")));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if !cli.json {
            eprint!("{} ", bold("?"));
            io::stderr().flush().ok();
        }
        let line = match lines.next_line().await.context("Failed to read stdin")? {
            Some(line) => line,
            None => break,
        };
        let question = line.trim();
        if question.is_empty() {
            break;
        }

        // A failed turn leaves the thread as it was; keep the session alive.
        if let Err(e) = answer(engine, cli, question, thread, cancel).await {
            eprintln!("{} {e:#}", red("error:"));
        }
        if cancel.is_cancelled() {
            break;
        }
    }
    Ok(())
}

async fn answer(
    engine: &QaEngine,
    cli: &Cli,
    question: &str,
    thread: ThreadId,
    cancel: &CancellationToken,
) -> Result<()> {
    let turn = engine
        .ask_cancellable(question, Some(thread), cancel)
        .await
        .context("Question failed")?;

    let report = if cli.no_evidence {
        Default::default()
    } else {
        engine
            .locate(&turn)
            .await
            .context("Failed to render evidence")?
    };

    if cli.json {
        let response = QueryResponse::from_turn(&turn, &report)?;
        let json = serde_json::to_string_pretty(&response).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    print_answer(&turn)?;

    if !cli.quiet {
        for image in &report.images {
            eprintln!(
                "  {} page {:>3}  {}",
                green("▣"),
                image.page_no,
                bold(&image.path.display().to_string())
            );
        }
        for error in &report.errors {
            eprintln!("  {} {}", red("✗"), truncate(&error.to_string(), 100));
        }
    }
    Ok(())
}

fn print_answer(turn: &TurnOutput) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{}", turn.result.answer.trim_end()).context("Failed to write to stdout")?;

    let references = turn.result.references();
    if !references.is_empty() {
        writeln!(out)?;
        for (i, r) in references.iter().enumerate() {
            writeln!(
                out,
                "[{}] {}, p. {}  {}",
                i + 1,
                r.source,
                r.page_no,
                dim(&format!("\u{201c}{}\u{201d}", truncate(&r.text, 90)))
            )?;
        }
    }
    Ok(())
}

/// Map CLI args to `QaConfig`.
fn build_config(cli: &Cli, show_progress: bool) -> Result<QaConfig> {
    let mut builder = QaConfig::builder()
        .output_dir(&cli.output_dir)
        .similarity_threshold(cli.threshold)
        .evidence_dpi(cli.dpi)
        .max_retries(cli.max_retries)
        .max_rewrites(cli.max_rewrites)
        .top_k(cli.top_k)
        .temperature(cli.temperature);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if show_progress {
        builder = builder.observer(CliObserver::new());
    }

    builder.build().context("Invalid configuration")
}
