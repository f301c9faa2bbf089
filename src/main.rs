mod config;
mod export;
mod render;

use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use catscope_adb::BridgeClient;
use catscope_logs::{LogPipeline, StopCause};
use catscope_types::{LogBufferSelection, Priority};

use crate::config::{FileConfig, Settings};
use crate::render::TerminalRenderer;

/// Catscope - a live, filterable viewer for Android logcat streams
#[derive(Parser, Debug)]
#[command(name = "catscope")]
#[command(author, version, about, long_about = None)]
pub(crate) struct Args {
    /// Path to the adb executable
    #[arg(long, value_name = "PATH")]
    adb_path: Option<PathBuf>,

    /// Device serial (default device if omitted)
    #[arg(short = 's', long)]
    device: Option<String>,

    /// Only show logs of this package's process
    #[arg(short, long)]
    package: Option<String>,

    /// Source-side tag filters, e.g. `MyTag:D,System:W`
    #[arg(long, value_name = "TAG:PRIORITY,...")]
    tags: Option<String>,

    /// Minimum priority to display (V, D, I, W, E, F, S)
    #[arg(long, value_name = "LEVEL")]
    min_level: Option<Priority>,

    /// Logcat buffer (main, system, crash, all)
    #[arg(long)]
    buffer: Option<LogBufferSelection>,

    /// Number of records kept in memory
    #[arg(long, value_name = "RECORDS")]
    buffer_size: Option<usize>,

    /// Only show records whose tag or message contains this text
    #[arg(long, value_name = "TEXT")]
    grep: Option<String>,

    /// Treat --grep as a regular expression
    #[arg(long, requires = "grep")]
    regex: bool,

    /// Only show these tags (exact names, comma-separated)
    #[arg(long, value_delimiter = ',', value_name = "TAGS")]
    tag_filter: Vec<String>,

    /// Only show this PID
    #[arg(long)]
    pid: Option<String>,

    /// Export visible records on exit (.csv for CSV, TSV otherwise)
    #[arg(long, value_name = "FILE", num_args = 0..=1)]
    export: Option<Option<PathBuf>>,

    /// List attached devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Stream unfiltered if --package is not running
    #[arg(long)]
    allow_missing_pid: bool,

    /// Configuration file (default: $XDG_CONFIG_HOME/catscope/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Diagnostics go to stderr; stdout carries the log lines
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let file = FileConfig::discover(args.config.as_deref())?;
    let settings = Settings::resolve(&args, file)?;
    let bridge = BridgeClient::new(&settings.adb_path).with_timeout(settings.command_timeout);

    if args.list_devices {
        return list_devices(&bridge).await;
    }

    let mut pipeline =
        LogPipeline::with_observer(bridge, settings.pipeline.clone(), TerminalRenderer::stdout());

    // Display-side filters
    pipeline.set_min_priority(settings.min_priority);
    if let Some(query) = &args.grep {
        pipeline.set_text_filter(query, args.regex);
        if let Some(err) = pipeline.filter().criteria().text_error() {
            bail!("invalid --grep pattern: {}", err);
        }
    }
    if !args.tag_filter.is_empty() {
        pipeline.set_tag_filter(args.tag_filter.iter().cloned().collect());
    }
    if let Some(pid) = &args.pid {
        pipeline.set_pid_filter(pid);
    }

    let mut request = settings.request.clone();
    if let Some(package) = &settings.package {
        match pipeline.resolve_pid(request.device.as_deref(), package).await {
            Some(pid) => {
                info!(package = %package, pid = %pid, "resolved package");
                request.pid = Some(pid);
            }
            None if args.allow_missing_pid => {
                warn!(package = %package, "package is not running, streaming all processes");
            }
            None => bail!(
                "package '{}' is not running (use --allow-missing-pid to stream anyway)",
                package
            ),
        }
    }

    pipeline.connect(&request).await;

    let mut ticker = tokio::time::interval(pipeline.drain_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let cause = loop {
        tokio::select! {
            _ = &mut ctrl_c => break pipeline.shutdown().await,

            _ = ticker.tick() => {
                let report = pipeline.tick().await;

                if let Some(e) = pipeline.observer_mut().take_error() {
                    // Output piped into something that went away
                    if e.kind() == ErrorKind::BrokenPipe {
                        break pipeline.shutdown().await;
                    }
                    pipeline.shutdown().await;
                    return Err(e).context("failed to write to stdout");
                }

                if let Some(cause) = report.stopped {
                    break Some(cause);
                }
            }
        }
    };

    info!(?cause, printed = pipeline.observer().printed(), "stream ended");

    if cause == Some(StopCause::LaunchFailed) {
        bail!(
            "could not launch '{}'; is adb installed and on PATH?",
            settings.adb_path.display()
        );
    }

    if let Some(target) = args.export {
        let path = target.unwrap_or_else(export::default_filename);
        let count = export::export_view(&path, &pipeline.view())?;
        eprintln!("Exported {} lines to {}", count, path.display());
    }

    eprintln!("{}", pipeline.stats());
    Ok(())
}

async fn list_devices(bridge: &BridgeClient) -> Result<()> {
    let devices = bridge
        .list_devices()
        .await
        .context("failed to list devices")?;

    if devices.is_empty() {
        eprintln!("No devices attached");
    }
    for device in devices {
        println!("{}\t{}", device.serial, device.status);
    }
    Ok(())
}
