//! CLI entry point for media-squeeze
//!
//! Parses command line arguments, wires Ctrl+C to the cancellation token and
//! runs one batch over the series or movie library.

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use media_squeeze::{
    run_library, run_startup_checks, BatchError, BitrateFlags, CatalogKind, Config, NameFilter,
    RunOptions,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

/// media-squeeze - Shrink series and movie libraries with ffmpeg
#[derive(Parser, Debug)]
#[command(name = "media-squeeze")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    catalog: Catalog,

    /// Only process series/movies whose name contains this text (case-insensitive)
    #[arg(long, global = true)]
    name: Option<String>,

    /// File with one series/movie name per line to process
    #[arg(long, global = true)]
    list: Option<PathBuf>,

    /// Print the bitrate of every candidate instead of compressing
    #[arg(long, global = true)]
    show_bitrate: bool,

    /// Skip files whose bitrate (Mbps) is below this value
    #[arg(long, global = true, value_name = "MBPS")]
    filter_bitrate: Option<f64>,

    /// Target bitrate (Mbps) for files passing --filter-bitrate
    #[arg(long, global = true, value_name = "MBPS")]
    compress_bitrate: Option<f64>,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "media-squeeze.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Skip startup checks (ffmpeg, ffprobe). For testing only.
    #[arg(long, global = true, default_value = "false")]
    skip_checks: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Catalog {
    /// Compress the series library (<series>/<season>/<file>)
    Series,
    /// Compress the movie library
    Movies,
}

impl From<Catalog> for CatalogKind {
    fn from(catalog: Catalog) -> Self {
        match catalog {
            Catalog::Series => CatalogKind::Series,
            Catalog::Movies => CatalogKind::Movies,
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after cleanup...");
            cancel.cancel();
        }
    });
}

/// Exit status for a run that stopped with `err`: 1 for configuration errors,
/// 0 for environment failures such as a share that would not mount.
fn exit_status(err: &BatchError) -> u8 {
    if err.is_configuration_error() {
        1
    } else {
        0
    }
}

/// Validates flags and configuration before anything touches the library.
fn prepare(args: &Args) -> Result<(Config, RunOptions), String> {
    let filter = NameFilter::from_flags(args.name.as_deref(), args.list.as_deref())
        .map_err(|e| e.to_string())?;

    let bitrate = BitrateFlags {
        show_bitrate: args.show_bitrate,
        filter_bitrate: args.filter_bitrate,
        compress_bitrate: args.compress_bitrate,
    };
    bitrate.validate().map_err(|e| e.to_string())?;

    let config = Config::load(&args.config).map_err(|e| e.to_string())?;

    Ok((
        config,
        RunOptions {
            kind: args.catalog.into(),
            filter,
            bitrate,
        },
    ))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(args.verbose);

    let (config, options) = match prepare(&args) {
        Ok(prepared) => prepared,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
    } else if let Err(e) = run_startup_checks(&config, options.bitrate.show_bitrate) {
        let err = BatchError::from(e);
        error!("{}", err);
        return ExitCode::from(exit_status(&err));
    }

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    info!("Processing {} library", options.kind.as_str());
    match run_library(&config, options, cancel.clone()).await {
        Ok(summary) => {
            if summary.was_cancelled() || cancel.is_cancelled() {
                info!("Stopped by user");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}
