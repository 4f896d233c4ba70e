//! rpaforge - Batch converter for RPA archives.
//!
//! Usage:
//!   rpaforge extract <ARCHIVES>... --dest <DIR> --engine <PATH>
//!   rpaforge create <SOURCES>... --output <FILE> --engine <PATH>
//!   rpaforge watch
//!   rpaforge --help          Show help

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, Context, ContextCompat, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::oneshot;
use tracing::debug;

use rpaforge_core::{ForgeConfig, ProgressRecord, RunOutcome, DEFAULT_FORMAT_VERSION};
use rpaforge_ops::{CommandEngine, OperationDispatcher, ProgressChannel};

/// Cadence at which the progress record is read back for display.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(
    name = "rpaforge",
    version,
    about = "Batch converter for RPA archives",
    long_about = "rpaforge extracts RPA archives and packs directories back into them,\n\
                  running batches through an external archive engine while progress\n\
                  is published to a record any observer can poll."
)]
struct Cli {
    /// Directory holding the progress file and staging areas
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract one or many archives into a destination directory
    Extract {
        /// Archives to extract, in order
        #[arg(required = true)]
        archives: Vec<PathBuf>,

        /// Destination directory shared by all archives
        #[arg(short, long)]
        dest: PathBuf,

        /// Archive engine executable
        #[arg(long)]
        engine: PathBuf,
    },

    /// Merge one or many sources into a single archive
    Create {
        /// Source files or directories, in order
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Output archive path
        #[arg(short, long)]
        output: PathBuf,

        /// Archive format version to write
        #[arg(long, default_value_t = DEFAULT_FORMAT_VERSION)]
        format_version: u32,

        /// Obfuscation key, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_key, default_value = "0xDEADBEEF")]
        key: u32,

        /// Archive engine executable
        #[arg(long)]
        engine: PathBuf,
    },

    /// Follow the progress of a running operation
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.debug);

    let work_dir = cli
        .work_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("rpaforge"));
    std::fs::create_dir_all(&work_dir).context("Could not create work directory")?;

    let config = ForgeConfig::builder().work_dir(work_dir).build()?;

    match cli.command {
        Command::Extract {
            archives,
            dest,
            engine,
        } => run_extract(&config, archives, dest, engine).await,
        Command::Create {
            sources,
            output,
            format_version,
            key,
            engine,
        } => run_create(&config, sources, output, format_version, key, engine).await,
        Command::Watch => run_watch(&config).await,
    }
}

/// Dispatch an extraction and render progress until it resolves.
async fn run_extract(
    config: &ForgeConfig,
    archives: Vec<PathBuf>,
    dest: PathBuf,
    engine: PathBuf,
) -> Result<()> {
    let archives = canonicalize_all(archives)?;
    std::fs::create_dir_all(&dest).context("Could not create destination directory")?;
    let dest = dest.canonicalize().context("Invalid destination")?;

    debug!("extracting {} archive(s) into {}", archives.len(), dest.display());

    let dispatcher = OperationDispatcher::new(Arc::new(CommandEngine::new(engine)), config);
    let outcome = dispatcher.run_extract(archives, dest)?;
    finish(render_run(config, outcome).await?)
}

/// Dispatch a creation and render progress until it resolves.
async fn run_create(
    config: &ForgeConfig,
    sources: Vec<PathBuf>,
    output: PathBuf,
    format_version: u32,
    key: u32,
    engine: PathBuf,
) -> Result<()> {
    let sources = canonicalize_all(sources)?;
    if sources.len() == 1 && !sources[0].is_dir() {
        bail!("Single-source creation requires a directory");
    }
    let output = resolve_output(&output)?;

    debug!("packing {} source(s) into {}", sources.len(), output.display());

    let dispatcher = OperationDispatcher::new(Arc::new(CommandEngine::new(engine)), config);
    let outcome = dispatcher.run_create(sources, output, format_version, key)?;
    finish(render_run(config, outcome).await?)
}

/// Standalone observer: follow the channel until a terminal record.
async fn run_watch(config: &ForgeConfig) -> Result<()> {
    let channel = ProgressChannel::new(config.progress_path());
    let bar = progress_bar();

    loop {
        match channel.read() {
            Some(record) if record.is_completed() => {
                bar.finish_and_clear();
                println!("Operation completed");
                return Ok(());
            }
            Some(record) if record.is_failed() => {
                bar.finish_and_clear();
                bail!("Operation failed: {}", record.error_message);
            }
            Some(record) => update_bar(&bar, &record),
            None => bar.set_message("Waiting for an operation to start..."),
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Poll the channel for display while awaiting the run's outcome.
async fn render_run(
    config: &ForgeConfig,
    outcome: oneshot::Receiver<RunOutcome>,
) -> Result<RunOutcome> {
    let channel = ProgressChannel::new(config.progress_path());
    let bar = progress_bar();
    let mut rx = outcome;

    let outcome = loop {
        tokio::select! {
            result = &mut rx => {
                break result.context("Conversion worker disappeared")?;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                if let Some(record) = channel.read() {
                    update_bar(&bar, &record);
                }
            }
        }
    };

    bar.finish_and_clear();
    Ok(outcome)
}

fn finish(outcome: RunOutcome) -> Result<()> {
    if let Some(error) = outcome.error {
        bail!("{}: {error}", outcome.summary);
    }
    println!("{}", outcome.summary);
    Ok(())
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {wide_msg}")
            .expect("progress template is valid")
            .progress_chars("█░ "),
    );
    bar
}

fn update_bar(bar: &ProgressBar, record: &ProgressRecord) {
    bar.set_position(record.percentage().round() as u64);

    let mut message = String::new();
    if record.is_batch() {
        message.push_str(&format!(
            "[{}/{}] ",
            record.current_batch_index, record.total_batch_count
        ));
    }
    if !record.current_batch_file_name.is_empty() {
        message.push_str(&record.current_batch_file_name);
        message.push_str(": ");
    }
    message.push_str(&record.current_file);
    bar.set_message(message);
}

/// Resolve every input path, rejecting any that does not exist.
fn canonicalize_all(paths: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    paths
        .into_iter()
        .map(|path| {
            path.canonicalize()
                .with_context(|| format!("Invalid path: {}", path.display()))
        })
        .collect()
}

/// Resolve an output path whose file may not exist yet.
fn resolve_output(output: &Path) -> Result<PathBuf> {
    let file_name = output.file_name().context("Output path has no file name")?;
    let parent = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let parent = parent.canonicalize().context("Invalid output directory")?;
    Ok(parent.join(file_name))
}

/// Parse an obfuscation key, accepting decimal or 0x-prefixed hex.
fn parse_key(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("invalid key '{s}': {e}"))
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
