//! `procwatch` — attaches the probe to a running process and emits
//! redacted findings as a structured log and an optional terminal view.

use anyhow::{Context, Result};
use clap::Parser;
use procwatch_core::{ProbeError, ProbeOptions, Supervisor};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

mod log_writer;
mod view;

/// Attach to a running process and watch its stdio for secrets and
/// protocol-specific weaknesses.
#[derive(Parser, Debug)]
#[command(name = "procwatch", about = "Live process-stream observability probe")]
struct Args {
    /// Process identifier or name/command substring
    target: String,

    /// Maximum monitoring wall time in seconds; 0 = unbounded
    #[arg(long, default_value_t = 0)]
    duration: u64,

    /// Path for structured-log output
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Suppress the terminal view
    #[arg(long)]
    no_display: bool,

    /// Regular-expression allow-list on event bytes; repeatable
    #[arg(long = "filter")]
    filter: Vec<String>,

    /// Per-stream buffer capacity in kilobytes
    #[arg(long, default_value_t = 64)]
    buffer_size: usize,

    /// DirectFD poll cadence in milliseconds
    #[arg(long, default_value_t = 20)]
    poll_interval: u64,

    /// Emit per-event activity records in addition to vulnerabilities
    #[arg(long)]
    show_activity: bool,

    /// Opt in to trace-source fallback
    #[arg(long)]
    enable_strace: bool,
}

impl Args {
    fn into_options(self) -> ProbeOptions {
        let mut options = ProbeOptions::new(self.target);
        options.duration = (self.duration != 0).then(|| Duration::from_secs(self.duration));
        options.output = self.output;
        options.no_display = self.no_display;
        options.filter = self.filter;
        options.buffer_size_bytes = self.buffer_size.saturating_mul(1024);
        options.poll_interval = Duration::from_millis(self.poll_interval);
        options.show_activity = self.show_activity;
        options.enable_strace = self.enable_strace;
        options
    }
}

/// Exit codes: 0 clean stop, non-zero on configuration error or when no
/// matching target is found.
const EXIT_CONFIG_ERROR: i32 = 2;
const EXIT_NO_MATCHING_TARGET: i32 = 3;
const EXIT_RUNTIME_ERROR: i32 = 1;

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    for pattern in &args.filter {
        if let Err(e) = regex::Regex::new(pattern) {
            eprintln!("invalid --filter regex {pattern:?}: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    }

    let options = args.into_options();

    if let Err(e) = run(options).await {
        match e.downcast_ref::<ProbeError>() {
            Some(ProbeError::NoMatchingTarget(_)) => {
                eprintln!("{e}");
                std::process::exit(EXIT_NO_MATCHING_TARGET);
            }
            Some(ProbeError::Config(_)) => {
                eprintln!("{e}");
                std::process::exit(EXIT_CONFIG_ERROR);
            }
            _ => {
                eprintln!("{e}");
                std::process::exit(EXIT_RUNTIME_ERROR);
            }
        }
    }
}

async fn run(options: ProbeOptions) -> Result<()> {
    let mut log_writer = match &options.output {
        Some(path) => Some(
            log_writer::LogWriter::open(path)
                .await
                .with_context(|| format!("failed to open output log at {}", path.display()))?,
        ),
        None => None,
    };

    let no_display = options.no_display;
    let (record_tx, mut record_rx) = mpsc::channel(1024);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let supervisor = Supervisor::new(options);
    let cancel_on_ctrl_c = cancel_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_on_ctrl_c.send(true);
        }
    });

    let supervise = tokio::spawn(async move { supervisor.run(record_tx, cancel_rx).await });

    let mut view = (!no_display).then(view::TerminalView::new);
    while let Some(record) = record_rx.recv().await {
        if let Some(writer) = log_writer.as_mut() {
            if let Err(e) = writer.write(&record).await {
                log::warn!("log write failed: {e}");
            }
        }
        if let Some(view) = view.as_mut() {
            view.render(&record);
        }
    }

    let outcome = supervise.await.context("supervisor task panicked")?;
    outcome?;
    Ok(())
}
