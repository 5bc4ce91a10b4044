//! Replication engine behind `ftp2s3`
//!
//! The engine walks a directory tree on a remote file server ([`source::Source`], implemented over
//! FTP by [`ftp::FtpSource`]) and uploads every file to an object store ([`sink::Sink`],
//! implemented over S3 by [`s3::S3Sink`]):
//!
//! - [`replicate`](mod@replicate) - directory replicator, file transfer tasks and the run entry
//!   point
//! - [`retry`] - bounded retry with jittered backoff
//! - [`report`] - per-directory results and the run summary
//! - [`progress`] - counters and the periodic progress printer
//! - [`path`] - source identifiers and destination keys
//!
//! Concurrency across the whole run is bounded by the `throttle` crate's `Governor`.

use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::prelude::*;

pub mod config;
pub mod ftp;
pub mod path;
pub mod progress;
pub mod replicate;
pub mod report;
pub mod retry;
pub mod s3;
pub mod sink;
pub mod source;

#[cfg(test)]
pub mod testutils;

pub use config::{OutputConfig, ProgressSettings, RuntimeConfig, TracingConfig};
pub use replicate::{RunReport, Settings, TransferOutcome, replicate, replicate_with_progress};
pub use report::{DirectoryResult, Report, RunSummary};
pub use retry::RetryPolicy;

fn init_tracing(output: &OutputConfig, config: &TracingConfig) -> anyhow::Result<()> {
    let level = output.level();
    // RUST_LOG takes precedence over -v
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_str()))
    };
    let console_layer = (!output.quiet).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .with_target(false)
            .with_filter(filter())
    });
    let file_layer = match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed opening log file {:?}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_filter(filter()),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("failed initializing logging")?;
    Ok(())
}

fn build_runtime(config: &RuntimeConfig) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if config.max_workers > 0 {
        builder.worker_threads(config.max_workers);
    }
    if config.max_blocking_threads > 0 {
        builder.max_blocking_threads(config.max_blocking_threads);
    }
    builder.build().context("failed building tokio runtime")
}

/// Sets up logging and the runtime, then runs `func` to completion.
///
/// `func` receives the progress counters shared with the progress printer. Returns `None` when
/// setup or `func` failed; the error has been reported by then.
pub fn run<Fut, Summary>(
    progress: Option<ProgressSettings>,
    output: OutputConfig,
    runtime: RuntimeConfig,
    tracing_config: TracingConfig,
    func: impl FnOnce(Arc<progress::Progress>) -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
{
    if let Err(error) = init_tracing(&output, &tracing_config) {
        eprintln!("{:#}", &error);
        return None;
    }
    let runtime = match build_runtime(&runtime) {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!("{:#}", &error);
            if !output.quiet {
                eprintln!("{:#}", &error);
            }
            return None;
        }
    };
    let prog_track = Arc::new(progress::Progress::new());
    let res = runtime.block_on(async {
        let printer = progress.map(|settings| {
            tokio::spawn(progress::print_progress(
                prog_track.clone(),
                settings.delay,
            ))
        });
        let res = func(prog_track.clone()).await;
        if let Some(printer) = printer {
            printer.abort();
        }
        res
    });
    match res {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{}", &summary);
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                eprintln!("{:#}", &error);
            }
            None
        }
    }
}
