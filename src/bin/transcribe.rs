//! CLI binary for edgequake-transcribe.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `TranscriptionConfig` and writes the transcript.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_transcribe::title::DEFAULT_TITLE;
use edgequake_transcribe::{
    plan, transcribe, transcribe_to_file, ChunkMode, JobProgressCallback, ProgressCallback,
    TextSeparator, TranscribeError, TranscriptOutput, TranscriptionConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar over units, one log line per unit, and a
/// line for every retry and model switch.
struct CliProgressCallback {
    bar: ProgressBar,
    fallbacks: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Resolving inputs…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            fallbacks: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} units  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Transcribing");
        self.bar.reset_eta();
    }
}

fn truncate(msg: &str, max: usize) -> String {
    if msg.chars().count() > max {
        let cut: String = msg.chars().take(max - 1).collect();
        format!("{cut}\u{2026}")
    } else {
        msg.to_string()
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_job_start(&self, total_units: usize) {
        self.activate_bar(total_units);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Transcribing {total_units} unit(s)…"))
        ));
    }

    fn on_unit_start(&self, unit_num: usize, total_units: usize, name: &str) {
        self.bar
            .set_message(format!("{unit_num}/{total_units} {}", truncate(name, 40)));
    }

    fn on_upload_progress(&self, unit_num: usize, bytes_sent: u64, total_bytes: u64) {
        let pct = if total_bytes == 0 {
            100
        } else {
            bytes_sent * 100 / total_bytes
        };
        self.bar.set_message(format!("unit {unit_num}: uploading {pct}%"));
    }

    fn on_status(&self, message: &str) {
        self.bar.set_message(dim(message));
    }

    fn on_retry(&self, model: &str, attempt: u32, delay: Duration, error: &str) {
        self.bar.println(format!(
            "  {} {} attempt {} failed, retrying in {:.1}s  {}",
            yellow("↻"),
            model,
            attempt,
            delay.as_secs_f64(),
            dim(&truncate(error, 60)),
        ));
    }

    fn on_fallback(&self, from_model: &str, to_model: &str, _error: &str) {
        self.fallbacks.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} {} unavailable, switching to {}",
            yellow("⇣"),
            from_model,
            bold(to_model)
        ));
    }

    fn on_unit_complete(&self, unit_num: usize, total_units: usize, model_used: &str, text_len: usize) {
        self.bar.println(format!(
            "  {} Unit {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            unit_num,
            total_units,
            dim(&format!("{text_len:>6} chars")),
            dim(model_used),
        ));
        self.bar.inc(1);
    }

    fn on_unit_error(&self, unit_num: usize, total_units: usize, error: &str) {
        self.bar.println(format!(
            "  {} Unit {:>3}/{:<3}  {}",
            red("✗"),
            unit_num,
            total_units,
            red(&truncate(error, 80)),
        ));
    }

    fn on_job_complete(&self, total_units: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let switched = self.fallbacks.load(Ordering::SeqCst);
        if success_count == total_units {
            eprintln!(
                "{} {} unit(s) transcribed{}",
                green("✔"),
                bold(&success_count.to_string()),
                if switched > 0 {
                    format!("  ({switched} model switch(es))")
                } else {
                    String::new()
                }
            );
        } else {
            eprintln!(
                "{} {}/{} unit(s) transcribed",
                red("✘"),
                bold(&success_count.to_string()),
                total_units
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Transcribe a scan (stdout)
  transcribe letters.pdf

  # Several inputs, kept in order, written to a file
  transcribe page1.jpg page2.jpg page3.jpg -o letters.txt

  # Let the model name the output file
  transcribe --output-dir ./out archive-scan.pdf

  # Through a proxy with a small request-body limit
  transcribe --chunk-mode proxied big-book.pdf -o book.txt

  # Preview units and chunk counts (no API key needed)
  transcribe --plan-only big-book.pdf

  # Custom model chain
  transcribe --model gemini-2.5-pro --fallback-model gemini-2.5-flash,gemini-2.0-flash doc.pdf

RESILIENCE:
  PDFs over --max-pages pages are split into parts, uploaded with a
  resumable chunked protocol and transcribed in order. A content-policy
  refusal is retried once with a restoration prompt. Overload and rate-limit
  errors are retried with exponential backoff (1.5s, 3s, …), then the next
  model in the chain is tried. If a unit still fails, the text recovered so
  far is saved next to the output (or printed) before exiting.

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Gemini API key (takes precedence over --api-key)
  GEMINI_MODEL_NAME       Default model when --model is not given
  RUST_LOG                Override log filter (e.g. edgequake_transcribe=debug)
"#;

/// Transcribe images and PDFs to text with Gemini.
#[derive(Parser, Debug)]
#[command(
    name = "transcribe",
    version,
    about = "Transcribe images and PDFs to plain text with Gemini",
    long_about = "Transcribe scanned documents and images (local files or URLs) to plain text \
with Google Gemini. Large PDFs are split and uploaded in resumable chunks; refusals, overloads \
and rate limits are recovered with prompt escalation, backoff and model fallback.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file paths or HTTP/HTTPS URLs, transcribed in this order.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Write the transcript to this file instead of stdout.
    #[arg(short, long, env = "TRANSCRIBE_OUTPUT", conflicts_with = "output_dir")]
    output: Option<PathBuf>,

    /// Write `<suggested name>.txt` into this directory.
    #[arg(long, env = "TRANSCRIBE_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Primary model (default: GEMINI_MODEL_NAME, then gemini-2.5-flash).
    #[arg(long, env = "TRANSCRIBE_MODEL")]
    model: Option<String>,

    /// Fallback models, in order. Repeat or comma-separate.
    #[arg(long = "fallback-model", env = "TRANSCRIBE_FALLBACK_MODELS", value_delimiter = ',')]
    fallback_models: Vec<String>,

    /// API key, used when GEMINI_API_KEY is not set.
    #[arg(long, env = "TRANSCRIBE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Upload chunk size: direct (8 MiB), proxied (2 MiB), or a byte count (multiple of 262144).
    #[arg(long, env = "TRANSCRIBE_CHUNK_MODE", default_value = "direct")]
    chunk_mode: String,

    /// Maximum pages per split unit.
    #[arg(long, env = "TRANSCRIBE_MAX_PAGES", default_value_t = 10,
          value_parser = clap::value_parser!(u64).range(1..))]
    max_pages: u64,

    /// Send PDFs whole instead of splitting them.
    #[arg(long, env = "TRANSCRIBE_NO_SPLIT")]
    no_split: bool,

    /// Units up to this many bytes are sent inline instead of uploaded (0 = always upload).
    #[arg(long, env = "TRANSCRIBE_INLINE_LIMIT", default_value_t = 0)]
    inline_limit: usize,

    /// Unit separator: blank, hr, marker, or a custom string.
    #[arg(long, env = "TRANSCRIBE_SEPARATOR", default_value = "blank")]
    separator: String,

    /// Attempts per model before falling back.
    #[arg(long, env = "TRANSCRIBE_MAX_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: u32,

    /// First backoff delay in milliseconds; doubles after each failure.
    #[arg(long, env = "TRANSCRIBE_BASE_DELAY_MS", default_value_t = 1500)]
    base_delay_ms: u64,

    /// Pause between units in milliseconds.
    #[arg(long, env = "TRANSCRIBE_PACING_MS", default_value_t = 500)]
    pacing_ms: u64,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "TRANSCRIBE_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Keep the model's default safety thresholds.
    #[arg(long, env = "TRANSCRIBE_STRICT_SAFETY")]
    strict_safety: bool,

    /// Skip output cleanup (fences, preambles, blank-line runs).
    #[arg(long, env = "TRANSCRIBE_RAW")]
    raw: bool,

    /// Do not ask the model for a file name.
    #[arg(long, env = "TRANSCRIBE_NO_TITLE")]
    no_title: bool,

    /// Output structured JSON (TranscriptOutput) instead of text.
    #[arg(long, env = "TRANSCRIBE_JSON")]
    json: bool,

    /// Show how inputs would be split and uploaded, without transcribing.
    #[arg(long)]
    plan_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "TRANSCRIBE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TRANSCRIBE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "TRANSCRIBE_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds for URL inputs.
    #[arg(long, env = "TRANSCRIBE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-request timeout for generation calls in seconds.
    #[arg(long, env = "TRANSCRIBE_API_TIMEOUT", default_value_t = 300)]
    api_timeout: u64,

    /// Per-request timeout for upload calls in seconds.
    #[arg(long, env = "TRANSCRIBE_UPLOAD_TIMEOUT", default_value_t = 120)]
    upload_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.plan_only;
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

    // ── Plan-only mode ───────────────────────────────────────────────────
    if cli.plan_only {
        let config = build_config(&cli, None, None)?;
        let units = plan(&cli.inputs, &config).await.context("Failed to plan inputs")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&units).context("Failed to serialise plan")?
            );
        } else {
            println!("{:>4}  {:<40} {:<22} {:>12} {:>6} {:>7}", "#", "Unit", "Type", "Bytes", "Pages", "Chunks");
            for u in &units {
                println!(
                    "{:>4}  {:<40} {:<22} {:>12} {:>6} {:>7}",
                    u.index,
                    truncate(&u.name, 40),
                    u.media_type,
                    u.bytes,
                    u.pages.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                    if u.chunks == 0 { "inline".to_string() } else { u.chunks.to_string() },
                );
            }
        }
        return Ok(());
    }

    // ── Ctrl-C cancels between units / chunks / retry waits ──────────────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} Cancelling after the current request…", yellow("⚠"));
                cancel.cancel();
            }
        });
    }

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn JobProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb, Some(cancel))?;

    // ── Run ──────────────────────────────────────────────────────────────
    let result = if let Some(ref output_path) = cli.output {
        transcribe_to_file(&cli.inputs, output_path, &config).await
    } else {
        transcribe(&cli.inputs, &config).await
    };

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            save_partial(&cli, &e).await?;
            return Err(e).context("Transcription failed");
        }
    };

    if let Some(ref dir) = cli.output_dir {
        let name = output.suggested_name.as_deref().unwrap_or(DEFAULT_TITLE);
        let path = unique_path(dir, name).await;
        write_text(&path, &output.text).await?;
        report_written(&cli, &output, &path);
    } else if let Some(ref path) = cli.output {
        report_written(&cli, &output, path);
    } else if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(output.text.as_bytes())
            .context("Failed to write to stdout")?;
        if !output.text.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
        if !cli.quiet && !show_progress {
            eprintln!(
                "Transcribed {} unit(s) in {}ms with {}",
                output.stats.completed_units,
                output.stats.total_duration_ms,
                output.model_used.as_deref().unwrap_or("-")
            );
        }
    }

    Ok(())
}

/// Map CLI args to `TranscriptionConfig`.
fn build_config(
    cli: &Cli,
    progress: Option<ProgressCallback>,
    cancel: Option<CancellationToken>,
) -> Result<TranscriptionConfig> {
    let mut builder = TranscriptionConfig::builder()
        .chunk_mode(parse_chunk_mode(&cli.chunk_mode)?)
        .max_pages_per_unit(cli.max_pages as usize)
        .split_documents(!cli.no_split)
        .inline_limit_bytes(cli.inline_limit)
        .separator(parse_separator(&cli.separator))
        .max_attempts(cli.max_attempts)
        .retry_base_delay_ms(cli.base_delay_ms)
        .unit_pacing_ms(cli.pacing_ms)
        .temperature(cli.temperature)
        .permissive_safety(!cli.strict_safety)
        .clean_output(!cli.raw)
        .suggest_title(!cli.no_title && cli.output_dir.is_some())
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout)
        .upload_timeout_secs(cli.upload_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if !cli.fallback_models.is_empty() {
        builder = builder.fallback_models(cli.fallback_models.iter().map(|m| m.trim().to_string()));
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    if let Some(token) = cancel {
        builder = builder.cancel_token(token);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--chunk-mode` into `ChunkMode`.
fn parse_chunk_mode(s: &str) -> Result<ChunkMode> {
    match s.trim().to_lowercase().as_str() {
        "direct" => Ok(ChunkMode::Direct),
        "proxied" | "proxy" => Ok(ChunkMode::Proxied),
        other => {
            let bytes: usize = other
                .parse()
                .with_context(|| format!("Invalid chunk mode '{other}': use direct, proxied or a byte count"))?;
            Ok(ChunkMode::Custom(bytes))
        }
    }
}

/// Parse `--separator` into `TextSeparator`.
fn parse_separator(s: &str) -> TextSeparator {
    match s.to_lowercase().as_str() {
        "blank" | "none" => TextSeparator::BlankLine,
        "hr" | "---" => TextSeparator::HorizontalRule,
        "marker" | "comment" => TextSeparator::Marker,
        _ => TextSeparator::Custom(s.to_string()),
    }
}

/// Keep whatever a failed job produced: next to `-o`, else on stdout.
async fn save_partial(cli: &Cli, error: &TranscribeError) -> Result<()> {
    let Some(partial) = error.partial_text() else {
        return Ok(());
    };

    let target = match (&cli.output, &cli.output_dir) {
        (Some(path), _) => {
            let mut p = path.as_os_str().to_owned();
            p.push(".partial");
            Some(PathBuf::from(p))
        }
        (None, Some(dir)) => Some(unique_path(dir, &format!("{DEFAULT_TITLE}.partial")).await),
        (None, None) => None,
    };

    match target {
        Some(path) => {
            write_text(&path, partial).await?;
            eprintln!(
                "{} Partial transcript saved to {}",
                yellow("⚠"),
                bold(&path.display().to_string())
            );
        }
        None => {
            println!("{partial}");
            eprintln!("{} Printed the partial transcript above", yellow("⚠"));
        }
    }
    Ok(())
}

/// `<dir>/<stem>.txt`, or `<dir>/<stem>_<n>.txt` if that exists.
async fn unique_path(dir: &Path, stem: &str) -> PathBuf {
    let first = dir.join(format!("{stem}.txt"));
    if !tokio::fs::try_exists(&first).await.unwrap_or(false) {
        return first;
    }
    let mut n = 2;
    loop {
        let candidate = dir.join(format!("{stem}_{n}.txt"));
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}

async fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, text)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn report_written(cli: &Cli, output: &TranscriptOutput, path: &Path) {
    if cli.quiet {
        return;
    }
    eprintln!(
        "{}  {} unit(s)  {} chars  {}ms  →  {}",
        if output.used_fallback { cyan("⚠") } else { green("✔") },
        output.stats.completed_units,
        output.text.len(),
        output.stats.total_duration_ms,
        bold(&path.display().to_string()),
    );
    if output.used_fallback || output.stats.escalations > 0 {
        eprintln!(
            "   {} unit(s) via fallback model, {} restoration prompt(s)",
            dim(&output.stats.fallback_units.to_string()),
            dim(&output.stats.escalations.to_string()),
        );
    }
}
