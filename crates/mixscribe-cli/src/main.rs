// SPDX-License-Identifier: GPL-3.0-or-later
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use axum::serve;
use clap::{Args, Parser, Subcommand};
use mixscribe_api::router;
use mixscribe_application::{render, AppState, OutputFormat, RunConfig, RunReport};
use mixscribe_config::{load as load_config, AppConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "mixscribe")]
#[command(about = "Identify the tracks played in a DJ mix")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "MIXSCRIBE_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level and print a diagnostics summary
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Identify the tracks in an audio file
    Identify(IdentifyArgs),
    /// Serve the HTTP API
    Serve,
}

#[derive(Args, Debug)]
struct IdentifyArgs {
    /// Recording to analyze
    file: PathBuf,

    /// json, markdown (md) or csv
    #[arg(long, default_value_t = OutputFormat::Markdown)]
    format: OutputFormat,

    /// Write the tracklist here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Segment length in seconds
    #[arg(long)]
    segment_length: Option<f64>,

    /// Overlap between consecutive segments in seconds
    #[arg(long)]
    segment_overlap: Option<f64>,

    /// Minimum confidence (0.0-1.0) for a match to count
    #[arg(long)]
    confidence_threshold: Option<f32>,

    /// Process at most this many segments
    #[arg(long)]
    max_segments: Option<usize>,

    /// Segments processed at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Skip LLM and heuristic arbitration
    #[arg(long)]
    no_advisory: bool,
}

impl IdentifyArgs {
    fn run_config(&self, base: RunConfig) -> RunConfig {
        RunConfig {
            segment_length: self.segment_length.unwrap_or(base.segment_length),
            segment_overlap: self.segment_overlap.unwrap_or(base.segment_overlap),
            confidence_threshold: self
                .confidence_threshold
                .unwrap_or(base.confidence_threshold),
            max_segments: self.max_segments.or(base.max_segments),
            concurrency: self.concurrency.unwrap_or(base.concurrency),
            advisory_enabled: base.advisory_enabled && !self.no_advisory,
            ..base
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config, cli.verbose);

    match cli.command {
        Command::Identify(args) => identify(config, args, cli.verbose).await,
        Command::Serve => serve_api(config).await,
    }
}

fn init_tracing(config: &AppConfig, verbose: bool) {
    let fallback = if verbose {
        "debug"
    } else {
        config.telemetry.log_level.as_str()
    };
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true)
        .with_level(true);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

async fn identify(config: AppConfig, args: IdentifyArgs, verbose: bool) -> Result<()> {
    let state = AppState::from_config(config)?;
    state.on_start();
    let run_config = args.run_config(state.run_config());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watcher = tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    let result = state.pipeline.run(&args.file, &run_config, cancel).await;
    watcher.abort();
    let report = result?;

    if report.diagnostics.cancelled {
        warn!(target: "cli", "run interrupted, writing partial tracklist");
    }
    if verbose {
        print_summary(&report);
    }

    let text = render(&report.tracklist, args.format)?;
    write_output(&text, args.output.as_deref())?;
    Ok(())
}

fn write_output(text: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, text)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(target: "cli", "results saved to {}", path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    let d = &report.diagnostics;
    eprintln!(
        "segments: {} planned, {} attempted, {} identified, {} failed{}",
        d.segments_planned,
        d.segments_attempted,
        d.segments_succeeded,
        d.segments_failed,
        if d.truncated { " (truncated)" } else { "" }
    );
    eprintln!(
        "recognizer calls: {} ({} failed)",
        d.recognizer_calls, d.recognizer_failures
    );
    eprintln!("unique tracks: {}", report.tracklist.len());
    if d.error_count > 0 {
        eprintln!("errors: {} (showing {})", d.error_count, d.entries().len());
        for entry in d.entries() {
            eprintln!("  {}", entry);
        }
    }
}

async fn serve_api(config: AppConfig) -> Result<()> {
    let addr = bind_addr(&config.http)?;
    let state = AppState::from_config(config)?;
    state.on_start();

    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    info!(target: "cli", "listening on {}", addr);

    serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn bind_addr(http: &mixscribe_config::HttpConfig) -> Result<SocketAddr> {
    let addr = format!("{}:{}", http.host, http.port);
    addr.parse()
        .with_context(|| format!("invalid listen address {}", addr))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut interrupt), Ok(mut terminate)) => {
                tokio::select! {
                    _ = interrupt.recv() => {},
                    _ = terminate.recv() => {},
                }
            }
            _ => {
                warn!(target: "cli", "failed to install signal handlers, falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(target: "cli", error = %e, "ctrl-c handler failed");
            std::future::pending::<()>().await;
        }
    }

    info!(target: "cli", "shutdown signal received");
}
