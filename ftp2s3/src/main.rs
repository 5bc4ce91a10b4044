use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Clone)]
#[command(
    name = "ftp2s3",
    version,
    about = "Replicate a directory tree from an FTP server into an S3 bucket",
    long_about = "`ftp2s3` copies every file below an FTP directory into an S3 bucket, keeping the \
directory layout under a key prefix. Transfers run concurrently and every protocol step is retried.

EXAMPLE:
    # Copy /img from the FTP server into s3://my-bucket/img with progress
    ftp2s3 --host ftp.example.com --user alice --bucket my-bucket /img img --progress --summary

Existing objects with the same key are overwritten."
)]
struct Args {
    // FTP source
    /// FTP server host name or address
    #[arg(long, value_name = "HOST", help_heading = "FTP source")]
    host: String,

    /// FTP server port
    #[arg(
        long,
        default_value = "21",
        value_name = "PORT",
        help_heading = "FTP source"
    )]
    port: u16,

    /// FTP user name
    #[arg(
        short = 'u',
        long,
        default_value = "anonymous",
        value_name = "USER",
        help_heading = "FTP source"
    )]
    user: String,

    /// FTP password
    #[arg(
        long,
        env = "FTP2S3_FTP_PASSWORD",
        default_value = "",
        hide_env_values = true,
        value_name = "PASSWORD",
        help_heading = "FTP source"
    )]
    password: String,

    /// Timeout for establishing an FTP connection
    ///
    /// This option accepts a human readable duration, e.g. "500ms", "60s", "2min" etc.
    #[arg(
        long,
        default_value = "60s",
        value_name = "DURATION",
        value_parser = humantime::parse_duration,
        help_heading = "FTP source"
    )]
    connect_timeout: std::time::Duration,

    // S3 destination
    /// Destination bucket
    #[arg(short = 'b', long, value_name = "BUCKET", help_heading = "S3 destination")]
    bucket: String,

    /// AWS region, defaults to the AWS environment/profile configuration
    #[arg(long, env = "AWS_REGION", value_name = "REGION", help_heading = "S3 destination")]
    region: Option<String>,

    /// Custom endpoint URL for S3 compatible stores
    #[arg(long, value_name = "URL", help_heading = "S3 destination")]
    endpoint: Option<String>,

    /// AWS access key, requires --secret-key
    #[arg(
        long,
        env = "AWS_ACCESS_KEY_ID",
        hide_env_values = true,
        value_name = "KEY",
        requires = "secret_key",
        help_heading = "S3 destination"
    )]
    access_key: Option<String>,

    /// AWS secret key, requires --access-key
    #[arg(
        long,
        env = "AWS_SECRET_ACCESS_KEY",
        hide_env_values = true,
        value_name = "KEY",
        requires = "access_key",
        help_heading = "S3 destination"
    )]
    secret_key: Option<String>,

    /// Cache-Control header stored with every object
    #[arg(
        long,
        default_value = common::replicate::DEFAULT_CACHE_CONTROL,
        value_name = "VALUE",
        conflicts_with = "no_cache_control",
        help_heading = "S3 destination"
    )]
    cache_control: String,

    /// Do not set Cache-Control on uploaded objects
    #[arg(long, help_heading = "S3 destination")]
    no_cache_control: bool,

    /// Canned ACL applied to every object
    #[arg(
        long,
        default_value = common::replicate::DEFAULT_ACL,
        value_name = "ACL",
        conflicts_with = "no_acl",
        help_heading = "S3 destination"
    )]
    acl: String,

    /// Do not set an ACL on uploaded objects, e.g. for buckets with ACLs disabled
    #[arg(long, help_heading = "S3 destination")]
    no_acl: bool,

    // Retries
    /// Total number of attempts for every list, read and upload
    #[arg(
        long,
        default_value = "20",
        value_name = "N",
        help_heading = "Retries"
    )]
    retry_attempts: u32,

    /// Shortest random sleep between attempts
    #[arg(
        long,
        default_value = "100ms",
        value_name = "DURATION",
        value_parser = humantime::parse_duration,
        help_heading = "Retries"
    )]
    retry_backoff_min: std::time::Duration,

    /// Longest random sleep between attempts
    #[arg(
        long,
        default_value = "500ms",
        value_name = "DURATION",
        value_parser = humantime::parse_duration,
        help_heading = "Retries"
    )]
    retry_backoff_max: std::time::Duration,

    // Progress & output
    /// Show progress
    #[arg(long, help_heading = "Progress & output")]
    progress: bool,

    /// Sets the delay between progress updates, default is 10s
    ///
    /// If specified, --progress flag is implied.
    ///
    /// This option accepts a human readable duration, e.g. "200ms", "10s", "5min" etc.
    #[arg(long, value_name = "DELAY", help_heading = "Progress & output")]
    progress_delay: Option<String>,

    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    /// Append log output to this file as well
    #[arg(long, value_name = "PATH", help_heading = "Progress & output")]
    log_file: Option<std::path::PathBuf>,

    /// Write the per-directory results and the summary as JSON to this file
    #[arg(long, value_name = "PATH", help_heading = "Progress & output")]
    report_json: Option<std::path::PathBuf>,

    // Performance
    /// Maximum number of transfers in flight; one extra transfer may run while subdirectories are
    /// being picked up
    #[arg(
        long,
        default_value = "16",
        value_name = "N",
        help_heading = "Performance"
    )]
    max_operations: usize,

    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    ///
    /// Every FTP command runs on a blocking thread.
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    // ARGUMENTS
    /// FTP directory to replicate
    #[arg()]
    source: String,

    /// Key prefix in the bucket, empty means the bucket root
    #[arg(default_value = "")]
    prefix: String,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("source", &self.source)
            .field("prefix", &self.prefix)
            .field("max_operations", &self.max_operations)
            .finish_non_exhaustive()
    }
}

impl Args {
    fn settings(&self) -> common::Settings {
        common::Settings {
            max_operations: self.max_operations,
            retry: common::RetryPolicy::new()
                .with_max_attempts(self.retry_attempts)
                .with_backoff(self.retry_backoff_min, self.retry_backoff_max),
            connect_timeout: self.connect_timeout,
            cache_control: (!self.no_cache_control).then(|| self.cache_control.clone()),
            acl: (!self.no_acl).then(|| self.acl.clone()),
        }
    }

    fn s3_config(&self) -> common::s3::S3Config {
        let mut config = common::s3::S3Config::new(self.bucket.as_str());
        config.region = self.region.clone();
        config.endpoint = self.endpoint.clone();
        config.access_key = self.access_key.clone();
        config.secret_key = self.secret_key.clone();
        config
    }

    fn ftp_config(&self) -> common::ftp::FtpConfig {
        common::ftp::FtpConfig {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

#[instrument(skip(prog_track))]
async fn async_main(
    args: Args,
    prog_track: Arc<common::progress::Progress>,
) -> Result<common::RunSummary> {
    let settings = args.settings();
    settings.validate().map_err(|error| anyhow!(error))?;
    let sink = common::s3::S3Sink::new(&args.s3_config()).await?;
    let source = common::ftp::FtpSource::new(args.ftp_config());
    tracing::info!(
        "replicating ftp://{}:{}{} into s3://{}/{}",
        &args.host,
        args.port,
        &args.source,
        sink.bucket(),
        &args.prefix
    );
    let report = common::replicate_with_progress(
        Arc::new(source),
        Arc::new(sink),
        &args.source,
        &args.prefix,
        settings,
        prog_track,
    )
    .await?;
    if let Some(path) = &args.report_json {
        let json = serde_json::to_string_pretty(&report)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("failed writing report to {:?}", path))?;
    }
    if !report.summary.is_success() {
        if args.summary || args.verbose > 0 {
            return Err(anyhow!(
                "ftp2s3 encountered errors\n\n{}",
                &report.summary
            ));
        }
        return Err(anyhow!("ftp2s3 encountered errors"));
    }
    Ok(report.summary)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let progress = if args.progress || args.progress_delay.is_some() {
        Some(common::ProgressSettings::from_delay(
            args.progress_delay.as_deref(),
        )?)
    } else {
        None
    };
    let func = {
        let args = args.clone();
        |prog_track| async_main(args, prog_track)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let tracing = common::TracingConfig {
        log_file: args.log_file.clone(),
    };
    let res = common::run(progress, output, runtime, tracing, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
