//! Configuration types for runtime and execution settings

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    ///
    /// Every FTP command runs on a blocking thread.
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

impl OutputConfig {
    pub fn level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::ERROR,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

/// Log destinations
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// Append log events to this file, without colors
    pub log_file: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressSettings {
    pub delay: std::time::Duration,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            delay: std::time::Duration::from_secs(10),
        }
    }
}

impl ProgressSettings {
    /// Parses a human readable delay such as "200ms" or "5min", using the default when absent.
    pub fn from_delay(delay: Option<&str>) -> anyhow::Result<Self> {
        match delay {
            Some(delay) => Ok(Self {
                delay: humantime::parse_duration(delay)
                    .map_err(|error| anyhow::anyhow!("invalid progress delay '{delay}': {error}"))?,
            }),
            None => Ok(Self::default()),
        }
    }
}
